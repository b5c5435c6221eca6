// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Channel and page payload transfer between a sender and a dequeued receiver
//! OWNERS: @kernel-ipc-team
//! DEPENDS_ON: cap::ChannelTable, mm::{PageTable, handle_page_fault}
//! INVARIANTS: A delivered channel payload is always a fresh handle in the receiver;
//!             page payloads are moved (mapped in the receiver, unmapped in the sender) and
//!             never left partially mapped; kernel-mode parties exchange physical addresses

use alloc::vec::Vec;

use synapse_abi::Message;

use super::{IpcError, IpcOutcome};
use crate::kernel::Kernel;
use crate::mm::{handle_page_fault, is_valid_page_base, pages_for, PAYLOAD_FLAGS};
use crate::types::{ChannelId, Cid, PhysAddr, Tid, VirtAddr};

/// Why a payload transfer was abandoned after the receiver was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadAbort {
    /// The sender gets the error; the receiver is told to retry.
    Fail(IpcError),
    /// The sender's pages could not be faulted in; the sender is terminated.
    KillSender,
}

impl From<IpcError> for PayloadAbort {
    fn from(value: IpcError) -> Self {
        Self::Fail(value)
    }
}

impl PayloadAbort {
    pub(crate) fn into_outcome(
        self,
        kernel: &mut Kernel,
        sender: Tid,
    ) -> Result<IpcOutcome, IpcError> {
        match self {
            Self::Fail(err) => Err(err),
            Self::KillSender => {
                kernel.exit_thread(sender);
                Ok(IpcOutcome::Terminated)
            }
        }
    }
}

/// Source of the frames of a page payload.
enum PageSource {
    /// User sender: pages resolved through its page table, unmapped after the move.
    Mapped { base: VirtAddr, frames: Vec<PhysAddr> },
    /// Kernel-mode sender: physically contiguous range, nothing to unmap.
    Physical(PhysAddr),
}

/// A page payload mapped into the receiver but not yet taken from the sender.
struct MappedPages {
    source: PageSource,
    num_pages: usize,
    page_addr: usize,
    /// Receiver window the frames were linked into; `None` for a kernel-mode receiver.
    window: Option<VirtAddr>,
}

impl Kernel {
    /// Moves the channel and page payloads of `msg` from `sender` to `receiver`.
    ///
    /// Both payloads are validated and the pages mapped before the channel handle is minted;
    /// a failed mint unmaps the receiver window again, so neither party observes a partial
    /// transfer.
    pub(crate) fn transfer_payloads(
        &mut self,
        sender: Tid,
        receiver: Tid,
        msg: &Message,
    ) -> Result<(), PayloadAbort> {
        let peer = if msg.header.has_channel_payload() {
            Some(self.payload_peer(sender, msg.channel)?)
        } else {
            None
        };
        let pages = if msg.header.has_page_payload() {
            Some(self.map_pages(sender, receiver, msg)?)
        } else {
            None
        };
        if let Some((cid, peer)) = peer {
            if let Err(err) = self.mint_channel(sender, receiver, cid, peer) {
                if let Some(MappedPages { window: Some(window), num_pages, .. }) = &pages {
                    self.unmap_window(receiver, *window, *num_pages);
                }
                return Err(err.into());
            }
        }
        if let Some(pages) = pages {
            self.commit_pages(sender, receiver, msg, pages)?;
        }
        Ok(())
    }

    /// Resolves the sender's payload handle to the live channel its fresh copy links to.
    fn payload_peer(&self, sender: Tid, handle: i32) -> Result<(Cid, ChannelId), IpcError> {
        let sender_pid = self.thread_ref(sender)?.pid();
        let cid = Cid::from_abi(handle).ok_or(IpcError::InvalidPayload)?;
        let payload = self.lookup(sender_pid, cid).map_err(|_| IpcError::InvalidPayload)?;
        let peer = self.live(payload).map_err(|_| IpcError::InvalidPayload)?.linked_with;
        self.live(peer).map_err(|_| IpcError::InvalidPayload)?;
        Ok((cid, peer))
    }

    /// Mints a handle in the receiver linked to `peer`.
    fn mint_channel(
        &mut self,
        sender: Tid,
        receiver: Tid,
        cid: Cid,
        peer: ChannelId,
    ) -> Result<(), IpcError> {
        let receiver_pid = self.thread_ref(receiver)?.pid();
        let (fresh, fresh_cid) =
            self.create_channel(receiver_pid).map_err(|_| IpcError::OutOfMemory)?;
        self.link_ids(peer, fresh)?;
        self.thread_entry(receiver)?.message_mut().channel = fresh_cid.to_abi();
        log_trace!(
            target: "ipc",
            "channel payload {} of tid={} -> {} of pid={}",
            cid,
            sender,
            fresh_cid,
            receiver_pid
        );
        Ok(())
    }

    /// Checks the receiver window and links the sender's frames into it.
    fn map_pages(
        &mut self,
        sender: Tid,
        receiver: Tid,
        msg: &Message,
    ) -> Result<MappedPages, PayloadAbort> {
        let len = usize::try_from(msg.page_len).map_err(|_| IpcError::InvalidPagePayload)?;
        let num_pages = pages_for(len);
        if num_pages == 0 {
            return Err(IpcError::InvalidPagePayload.into());
        }
        let receiver_thread = self.thread_ref(receiver)?;
        let receiver_pid = receiver_thread.pid();
        let receiver_kernel = receiver_thread.uses_kernel_buffer();
        let info = receiver_thread.info();
        if !receiver_kernel && (info.num_pages < num_pages || !is_valid_page_base(info.page_base))
        {
            return Err(IpcError::InvalidPagePayload.into());
        }

        let source = self.page_source(sender, msg, num_pages)?;
        if receiver_kernel {
            let first = match &source {
                PageSource::Mapped { frames, .. } => frames.first().copied(),
                PageSource::Physical(base) => Some(*base),
            };
            let first = first.ok_or(IpcError::InvalidPagePayload)?;
            return Ok(MappedPages { source, num_pages, page_addr: first.raw(), window: None });
        }

        let table = &mut self
            .processes
            .get_mut(receiver_pid)
            .ok_or(IpcError::InvalidPagePayload)?
            .page_table;
        let mapped = match &source {
            PageSource::Mapped { frames, .. } => {
                table.link_frames(info.page_base, frames, PAYLOAD_FLAGS)
            }
            PageSource::Physical(base) => {
                table.link_pages(info.page_base, *base, num_pages, PAYLOAD_FLAGS)
            }
        };
        if let Err(err) = mapped {
            log_warn!(target: "ipc", "page payload map failed tid={} err={:?}", receiver, err);
            return Err(IpcError::InvalidPagePayload.into());
        }
        Ok(MappedPages {
            source,
            num_pages,
            page_addr: info.page_base.raw(),
            window: Some(info.page_base),
        })
    }

    fn unmap_window(&mut self, receiver: Tid, window: VirtAddr, num_pages: usize) {
        let Ok(pid) = self.thread_ref(receiver).map(|t| t.pid()) else {
            return;
        };
        if let Some(process) = self.processes.get_mut(pid) {
            process.page_table.unlink_pages(window, num_pages);
        }
    }

    /// Takes the pages from the sender and reports them in the receiver's message.
    fn commit_pages(
        &mut self,
        sender: Tid,
        receiver: Tid,
        msg: &Message,
        pages: MappedPages,
    ) -> Result<(), IpcError> {
        if let PageSource::Mapped { base, .. } = pages.source {
            let sender_pid = self.thread_ref(sender)?.pid();
            if let Some(process) = self.processes.get_mut(sender_pid) {
                process.page_table.unlink_pages(base, pages.num_pages);
            }
        }
        let dst = self.thread_entry(receiver)?.message_mut();
        dst.page_addr = pages.page_addr as u64;
        dst.page_len = msg.page_len;
        log_trace!(
            target: "ipc",
            "page payload {} pages tid={} -> tid={}",
            pages.num_pages,
            sender,
            receiver
        );
        Ok(())
    }

    /// Resolves the frames backing the sender's range, faulting pages in on demand.
    fn page_source(
        &mut self,
        sender: Tid,
        msg: &Message,
        num_pages: usize,
    ) -> Result<PageSource, PayloadAbort> {
        let thread = self.thread_ref(sender)?;
        let pid = thread.pid();
        let addr = usize::try_from(msg.page_addr).map_err(|_| IpcError::InvalidPayload)?;
        if thread.uses_kernel_buffer() {
            let base = PhysAddr::new(addr);
            if !base.is_page_aligned() || base.page(num_pages).is_none() {
                return Err(IpcError::InvalidPayload.into());
            }
            return Ok(PageSource::Physical(base));
        }

        let base = VirtAddr::new(addr);
        if !base.is_page_aligned() {
            return Err(IpcError::InvalidPayload.into());
        }
        let process = self.processes.get_mut(pid).ok_or(IpcError::InvalidPayload)?;
        let mut frames = Vec::with_capacity(num_pages);
        for index in 0..num_pages {
            let va = base.page(index).ok_or(IpcError::InvalidPayload)?;
            let frame = match process.page_table.resolve_physical(va) {
                Some(frame) => frame,
                None => handle_page_fault(
                    &process.vm_areas,
                    &mut process.page_table,
                    &mut self.frames,
                    va,
                )
                .map_err(|err| {
                    log_warn!(
                        target: "ipc",
                        "page payload fault tid={} va={} err={:?}",
                        sender,
                        va,
                        err
                    );
                    PayloadAbort::KillSender
                })?,
            };
            frames.push(frame);
        }
        Ok(PageSource::Mapped { base, frames })
    }
}
