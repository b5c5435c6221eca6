// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel-side checks of the message header before a send is attempted.

use synapse_abi::{MsgHeader, INLINE_DATA_MAX};

use super::IpcError;

/// Validates the header of an outgoing message.
///
/// Reserved bits can only be set by a corrupted buffer, so they halt the kernel instead of
/// returning an error.
pub fn validate_send(header: MsgHeader) -> Result<(), IpcError> {
    if header.reserved_bits() != 0 {
        panic!("ipc: reserved header bits set (header={:#010x})", header.raw());
    }
    if header.inline_len() > INLINE_DATA_MAX {
        return Err(IpcError::InvalidPayload);
    }
    Ok(())
}
