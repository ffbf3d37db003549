//! Per-kind recycling pool for exchange entries.
//!
//! Entries are boxed once and then cycle between the pool and the
//! in-flight registry without further allocation. Each kind has its own
//! LIFO stack, so the most recently released entry (with its scratch
//! memory still warm) is handed out first.

use std::ffi::CString;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::op::buffers::{IoBuffer, IoVecArray};
use crate::op::entry::{
    timespec_for, ExchangeEntry, OpCompletion, OpKind, SocketRequest, SpliceRequest,
};
use crate::op::stat::FileStat;

pub struct OperationPool {
    free: [Vec<Box<ExchangeEntry>>; OpKind::COUNT],
}

impl OperationPool {
    pub fn new() -> Self {
        Self {
            free: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Pops a pooled entry of `kind` or allocates a fresh one.
    fn alloc(&mut self, kind: OpKind) -> Box<ExchangeEntry> {
        self.free[kind.index()]
            .pop()
            .unwrap_or_else(|| Box::new(ExchangeEntry::fresh(kind)))
    }

    /// Returns an entry to its kind stack after its single completion has
    /// been dispatched. Clears continuations and per-invocation scratch so
    /// pooled entries never pin caller state.
    pub fn release(&mut self, mut entry: Box<ExchangeEntry>) {
        entry.clear();
        debug_assert!(!entry.has_continuation());
        self.free[entry.kind().index()].push(entry);
    }

    /// Number of idle entries of `kind` currently pooled.
    #[cfg(test)]
    pub(crate) fn idle(&self, kind: OpKind) -> usize {
        self.free[kind.index()].len()
    }

    pub fn for_nop(&mut self, complete: OpCompletion<()>) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Nop);
        if let ExchangeEntry::Nop { complete: slot } = &mut *entry {
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_delay(
        &mut self,
        duration: Duration,
        complete: OpCompletion<Duration>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Delay);
        if let ExchangeEntry::Delay {
            spec,
            started,
            complete: slot,
        } = &mut *entry
        {
            **spec = timespec_for(duration);
            *started = Instant::now();
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_read(
        &mut self,
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        linked: bool,
        complete: OpCompletion<(IoBuffer, usize)>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Read);
        if let ExchangeEntry::Read {
            fd: fd_slot,
            buffer: buffer_slot,
            offset: offset_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *buffer_slot = buffer;
            *offset_slot = offset;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_write(
        &mut self,
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        linked: bool,
        complete: OpCompletion<(IoBuffer, usize)>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Write);
        if let ExchangeEntry::Write {
            fd: fd_slot,
            buffer: buffer_slot,
            offset: offset_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *buffer_slot = buffer;
            *offset_slot = offset;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_read_vector(
        &mut self,
        fd: RawFd,
        mut buffers: Vec<IoBuffer>,
        offset: u64,
        linked: bool,
        complete: OpCompletion<(Vec<IoBuffer>, usize)>,
    ) -> Box<ExchangeEntry> {
        let iovec = IoVecArray::for_read(&mut buffers);
        let mut entry = self.alloc(OpKind::ReadVector);
        if let ExchangeEntry::ReadVector {
            fd: fd_slot,
            buffers: buffers_slot,
            iovec: iovec_slot,
            offset: offset_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *buffers_slot = buffers;
            *iovec_slot = iovec;
            *offset_slot = offset;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_write_vector(
        &mut self,
        fd: RawFd,
        buffers: Vec<IoBuffer>,
        offset: u64,
        linked: bool,
        complete: OpCompletion<(Vec<IoBuffer>, usize)>,
    ) -> Box<ExchangeEntry> {
        let iovec = IoVecArray::for_write(&buffers);
        let mut entry = self.alloc(OpKind::WriteVector);
        if let ExchangeEntry::WriteVector {
            fd: fd_slot,
            buffers: buffers_slot,
            iovec: iovec_slot,
            offset: offset_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *buffers_slot = buffers;
            *iovec_slot = iovec;
            *offset_slot = offset;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_open(
        &mut self,
        path: CString,
        flags: i32,
        mode: u32,
        linked: bool,
        complete: OpCompletion<RawFd>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Open);
        if let ExchangeEntry::Open {
            path: path_slot,
            flags: flags_slot,
            mode: mode_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *path_slot = path;
            *flags_slot = flags;
            *mode_slot = mode;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_close(
        &mut self,
        fd: RawFd,
        linked: bool,
        complete: OpCompletion<()>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Close);
        if let ExchangeEntry::Close {
            fd: fd_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_stat(
        &mut self,
        dirfd: RawFd,
        path: CString,
        flags: i32,
        mask: u32,
        complete: OpCompletion<FileStat>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Stat);
        if let ExchangeEntry::Stat {
            dirfd: dirfd_slot,
            path: path_slot,
            flags: flags_slot,
            mask: mask_slot,
            output,
            complete: slot,
        } = &mut *entry
        {
            *dirfd_slot = dirfd;
            *path_slot = path;
            *flags_slot = flags;
            *mask_slot = mask;
            *output = Some(Box::new(unsafe { std::mem::zeroed() }));
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_accept(
        &mut self,
        fd: RawFd,
        flags: i32,
        complete: OpCompletion<(RawFd, SocketAddr)>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Accept);
        if let ExchangeEntry::Accept {
            fd: fd_slot,
            flags: flags_slot,
            peer,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            *flags_slot = flags;
            peer.reset();
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_connect(
        &mut self,
        fd: RawFd,
        peer: SocketAddr,
        linked: bool,
        complete: OpCompletion<RawFd>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Connect);
        if let ExchangeEntry::Connect {
            fd: fd_slot,
            addr,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *fd_slot = fd;
            addr.fill(peer);
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_splice(
        &mut self,
        request: SpliceRequest,
        linked: bool,
        complete: OpCompletion<usize>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Splice);
        if let ExchangeEntry::Splice {
            request: request_slot,
            linked: linked_slot,
            complete: slot,
        } = &mut *entry
        {
            *request_slot = request;
            *linked_slot = linked;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_socket(
        &mut self,
        request: SocketRequest,
        complete: OpCompletion<RawFd>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Socket);
        if let ExchangeEntry::Socket {
            request: request_slot,
            complete: slot,
        } = &mut *entry
        {
            *request_slot = request;
            *slot = Some(complete);
        }
        entry
    }

    pub fn for_listen(
        &mut self,
        addr: SocketAddr,
        backlog: u32,
        complete: OpCompletion<(RawFd, SocketAddr)>,
    ) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::Listen);
        if let ExchangeEntry::Listen {
            addr: addr_slot,
            backlog: backlog_slot,
            complete: slot,
        } = &mut *entry
        {
            *addr_slot = addr;
            *backlog_slot = backlog;
            *slot = Some(complete);
        }
        entry
    }

    /// Companion timeout that must be submitted in the slot directly after
    /// a linked primary operation.
    pub fn link_timeout(&mut self, duration: Duration) -> Box<ExchangeEntry> {
        let mut entry = self.alloc(OpKind::LinkTimeout);
        if let ExchangeEntry::LinkTimeout { spec } = &mut *entry {
            **spec = timespec_for(duration);
        }
        entry
    }
}

impl Default for OperationPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_then_alloc_reuses_the_same_entry() {
        let mut pool = OperationPool::new();
        let entry = pool.for_nop(Box::new(|_| {}));
        let address = &*entry as *const ExchangeEntry;

        pool.release(entry);
        assert_eq!(pool.idle(OpKind::Nop), 1);

        let reused = pool.for_nop(Box::new(|_| {}));
        assert_eq!(&*reused as *const ExchangeEntry, address);
        assert_eq!(pool.idle(OpKind::Nop), 0);
    }

    #[test]
    fn kinds_pool_independently() {
        let mut pool = OperationPool::new();
        let nop = pool.for_nop(Box::new(|_| {}));
        let close = pool.for_close(7, false, Box::new(|_| {}));

        pool.release(nop);
        pool.release(close);

        assert_eq!(pool.idle(OpKind::Nop), 1);
        assert_eq!(pool.idle(OpKind::Close), 1);
        assert_eq!(pool.idle(OpKind::Read), 0);
    }

    #[test]
    fn release_discards_the_continuation() {
        let mut pool = OperationPool::new();
        let entry = pool.for_close(7, false, Box::new(|_| {}));
        assert!(entry.has_continuation());

        pool.release(entry);

        let reused = pool.alloc(OpKind::Close);
        assert!(!reused.has_continuation());
    }

    #[test]
    fn released_read_entry_drops_its_buffer() {
        let mut pool = OperationPool::new();
        let entry = pool.for_read(3, IoBuffer::with_capacity(64), 0, false, Box::new(|_| {}));
        pool.release(entry);

        if let ExchangeEntry::Read { buffer, .. } = &*pool.alloc(OpKind::Read) {
            assert_eq!(buffer.capacity(), 0);
        } else {
            panic!("pool returned a different kind");
        }
    }
}
