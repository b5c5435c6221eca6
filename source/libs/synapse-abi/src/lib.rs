// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared user/kernel ABI for SYNAPSE channel IPC
//! OWNERS: @runtime
//! PUBLIC API: Message, MsgHeader, IpcFlags, Errno, syscall::{IPC..NOP, word, syscall_type}
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Message is exactly 256 bytes LE with fixed field offsets; syscall IDs and errno
//!             values are stable within one ABI version; reserved header bits stay zero

use bitflags::bitflags;

/// Result type returned by ABI helpers.
pub type Result<T> = core::result::Result<T, Errno>;

/// Total size of a message buffer in bytes.
pub const MESSAGE_SIZE: usize = 256;
/// Byte offset of the inline payload inside a message buffer.
pub const INLINE_DATA_OFFSET: usize = 40;
/// Largest inline payload a message can carry.
pub const INLINE_DATA_MAX: usize = MESSAGE_SIZE - INLINE_DATA_OFFSET;
/// Page granularity used by page payloads.
pub const PAGE_SIZE: usize = 4096;
/// Message type of notification messages synthesized by the kernel.
pub const NOTIFICATION_MSG: u16 = 1;

/// Message header word.
///
/// Layout (LSB first): bits 0-11 inline payload length, bit 12 channel payload, bit 13 page
/// payload, bits 14-15 reserved (must be zero), bits 16-31 message type.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MsgHeader(u32);

impl MsgHeader {
    /// Mask selecting the declared inline payload length.
    pub const INLINE_LEN_MASK: u32 = 0x0fff;
    /// The message carries a channel handle in [`Message::channel`].
    pub const CHANNEL_PAYLOAD: u32 = 1 << 12;
    /// The message carries pages described by [`Message::page_addr`]/[`Message::page_len`].
    pub const PAGE_PAYLOAD: u32 = 1 << 13;
    /// Bits that must never be set.
    pub const RESERVED_MASK: u32 = 0b11 << 14;
    /// Shift of the message type field.
    pub const TYPE_SHIFT: u32 = 16;
    /// Header of a notification message (no inline payload).
    pub const NOTIFICATION: Self = Self::new(NOTIFICATION_MSG, 0);

    /// Builds a header with the given type and inline payload length.
    pub const fn new(ty: u16, inline_len: usize) -> Self {
        Self(((ty as u32) << Self::TYPE_SHIFT) | (inline_len as u32 & Self::INLINE_LEN_MASK))
    }

    /// Reinterprets a raw header word.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw header word.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Message type.
    pub const fn msg_type(self) -> u16 {
        (self.0 >> Self::TYPE_SHIFT) as u16
    }

    /// Declared inline payload length (may exceed [`INLINE_DATA_MAX`] in malformed headers).
    pub const fn inline_len(self) -> usize {
        (self.0 & Self::INLINE_LEN_MASK) as usize
    }

    /// Returns true if a channel payload is attached.
    pub const fn has_channel_payload(self) -> bool {
        self.0 & Self::CHANNEL_PAYLOAD != 0
    }

    /// Returns true if a page payload is attached.
    pub const fn has_page_payload(self) -> bool {
        self.0 & Self::PAGE_PAYLOAD != 0
    }

    /// Reserved bits present in the header.
    pub const fn reserved_bits(self) -> u32 {
        self.0 & Self::RESERVED_MASK
    }

    /// Returns true if the header only describes an inline payload that fits the buffer.
    pub const fn is_inline_only(self) -> bool {
        self.0 & (Self::CHANNEL_PAYLOAD | Self::PAGE_PAYLOAD | Self::RESERVED_MASK) == 0
            && self.inline_len() <= INLINE_DATA_MAX
    }

    /// Returns the header with the channel payload bit set.
    pub const fn with_channel_payload(self) -> Self {
        Self(self.0 | Self::CHANNEL_PAYLOAD)
    }

    /// Returns the header with the page payload bit set.
    pub const fn with_page_payload(self) -> Self {
        Self(self.0 | Self::PAGE_PAYLOAD)
    }
}

/// Fixed-size message buffer exchanged through channels.
///
/// The payload descriptors are laid out side by side rather than overlapping so that every
/// field keeps a stable offset:
///
/// | offset | field          |
/// |--------|----------------|
/// | 0      | `header`       |
/// | 4      | `from`         |
/// | 8      | `notification` |
/// | 16     | `channel`      |
/// | 24     | `page_addr`    |
/// | 32     | `page_len`     |
/// | 40     | `data`         |
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    /// Type and payload-kind bits.
    pub header: MsgHeader,
    /// Source channel handle stamped by the kernel; 0 for notifications.
    pub from: i32,
    /// Notification bits drained on receive.
    pub notification: u64,
    /// Channel handle carried by a channel payload.
    pub channel: i32,
    _pad: u32,
    /// Start of a page payload (virtual, or physical for kernel-mode parties).
    pub page_addr: u64,
    /// Length of a page payload in bytes.
    pub page_len: u64,
    /// Inline payload bytes.
    pub data: [u8; INLINE_DATA_MAX],
}

const _: () = assert!(core::mem::size_of::<Message>() == MESSAGE_SIZE);

impl Message {
    /// Returns an all-zero message.
    pub const fn zeroed() -> Self {
        Self {
            header: MsgHeader(0),
            from: 0,
            notification: 0,
            channel: 0,
            _pad: 0,
            page_addr: 0,
            page_len: 0,
            data: [0; INLINE_DATA_MAX],
        }
    }

    /// Builds a message of type `ty` carrying `payload` inline (truncated to the buffer).
    pub fn inline(ty: u16, payload: &[u8]) -> Self {
        let len = payload.len().min(INLINE_DATA_MAX);
        let mut msg = Self::zeroed();
        msg.header = MsgHeader::new(ty, len);
        msg.data[..len].copy_from_slice(&payload[..len]);
        msg
    }

    /// Inline payload bytes as declared by the header, bounded by the buffer size.
    pub fn inline_data(&self) -> &[u8] {
        &self.data[..self.header.inline_len().min(INLINE_DATA_MAX)]
    }

    /// Serialises the message to its little-endian wire image.
    pub fn to_le_bytes(&self) -> [u8; MESSAGE_SIZE] {
        let mut bytes = [0u8; MESSAGE_SIZE];
        bytes[0..4].copy_from_slice(&self.header.raw().to_le_bytes());
        bytes[4..8].copy_from_slice(&self.from.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.notification.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.channel.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.page_addr.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.page_len.to_le_bytes());
        bytes[INLINE_DATA_OFFSET..].copy_from_slice(&self.data);
        bytes
    }

    /// Deserialises a little-endian wire image; padding bytes are ignored.
    pub fn from_le_bytes(bytes: &[u8; MESSAGE_SIZE]) -> Self {
        let mut msg = Self::zeroed();
        msg.header = MsgHeader(u32::from_le_bytes(array(bytes, 0)));
        msg.from = i32::from_le_bytes(array(bytes, 4));
        msg.notification = u64::from_le_bytes(array(bytes, 8));
        msg.channel = i32::from_le_bytes(array(bytes, 16));
        msg.page_addr = u64::from_le_bytes(array(bytes, 24));
        msg.page_len = u64::from_le_bytes(array(bytes, 32));
        msg.data.copy_from_slice(&bytes[INLINE_DATA_OFFSET..]);
        msg
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::zeroed()
    }
}

fn array<const N: usize>(bytes: &[u8; MESSAGE_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

bitflags! {
    /// Direction bits of an IPC syscall word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct IpcFlags: u32 {
        /// Send the caller's message.
        const SEND = 1 << 8;
        /// Receive into the caller's message buffer.
        const RECV = 1 << 9;
        /// Fail with [`Errno::WouldBlock`] instead of waiting for a receiver.
        const NOBLOCK = 1 << 10;
    }
}

/// Syscall numbers and syscall word encoding.
///
/// The syscall word carries the syscall type in bits 0-7 and [`IpcFlags`] in bits 8-15.
pub mod syscall {
    use super::IpcFlags;

    /// Send and/or receive a message.
    pub const IPC: u32 = 1;
    /// Create a channel.
    pub const OPEN: u32 = 2;
    /// Destroy a channel.
    pub const CLOSE: u32 = 3;
    /// Link two channels.
    pub const LINK: u32 = 4;
    /// Redirect a channel's receiving endpoint.
    pub const TRANSFER: u32 = 5;
    /// Merge notification bits.
    pub const NOTIFY: u32 = 6;
    /// Does nothing and returns 1.
    pub const NOP: u32 = 7;

    /// Mask of the syscall type field.
    pub const TYPE_MASK: u32 = 0xff;
    /// Word handled by the IPC fast path.
    pub const FASTPATH_WORD: u32 = word(IPC, IpcFlags::SEND.union(IpcFlags::RECV));

    /// Encodes a syscall word.
    pub const fn word(ty: u32, flags: IpcFlags) -> u32 {
        (ty & TYPE_MASK) | flags.bits()
    }

    /// Extracts the syscall type.
    pub const fn syscall_type(word: u32) -> u32 {
        word & TYPE_MASK
    }

    /// Extracts the IPC direction flags (unknown bits are dropped).
    pub const fn ipc_flags(word: u32) -> IpcFlags {
        IpcFlags::from_bits_truncate(word)
    }
}

/// Error codes returned (negated) by syscalls.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Errno {
    /// Allocation failed while delivering a payload.
    OutOfMemory = 1,
    /// Handle space or channel storage exhausted.
    OutOfResource = 2,
    /// Handle does not name a channel of the calling process.
    InvalidCid = 3,
    /// Channel has been destroyed.
    ChannelClosed = 4,
    /// Non-blocking send found no receiver.
    WouldBlock = 5,
    /// Another thread already receives on the channel.
    AlreadyReceiving = 6,
    /// Malformed inline or channel payload.
    InvalidPayload = 7,
    /// Receiver cannot accept the declared pages.
    InvalidPagePayload = 8,
    /// The peer aborted the rendezvous; try again.
    NeedsRetry = 9,
    /// Unknown syscall type.
    InvalidSyscall = 10,
    /// Caller cannot issue the call in its current state.
    InvalidArg = 11,
}

impl Errno {
    /// Positive error code.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Value left in the return register.
    pub const fn as_return(self) -> isize {
        -(self as isize)
    }

    /// Maps a positive error code back to its variant.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::OutOfMemory,
            2 => Self::OutOfResource,
            3 => Self::InvalidCid,
            4 => Self::ChannelClosed,
            5 => Self::WouldBlock,
            6 => Self::AlreadyReceiving,
            7 => Self::InvalidPayload,
            8 => Self::InvalidPagePayload,
            9 => Self::NeedsRetry,
            10 => Self::InvalidSyscall,
            11 => Self::InvalidArg,
            _ => return None,
        })
    }
}

/// Splits a syscall return register into a value or an error.
///
/// Negative values that do not name a known error are reported as [`Errno::InvalidArg`].
pub fn decode_return(ret: isize) -> Result<usize> {
    if ret >= 0 {
        return Ok(ret as usize);
    }
    let code = ret.checked_neg().and_then(|v| i32::try_from(v).ok()).unwrap_or(i32::MAX);
    Err(Errno::from_code(code).unwrap_or(Errno::InvalidArg))
}
