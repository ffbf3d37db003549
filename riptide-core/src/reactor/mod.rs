//! Single-owner proactor loop over the ring transport.
//!
//! The reactor owns the transport, the in-flight registry, the entry pool
//! and an overflow queue of prepared-but-unsubmitted entries. Callers
//! request operations and receive a [`Promise`] immediately; the actual
//! slot traffic happens inside [`Reactor::tick`], which one thread drives.
//!
//! A tick is: drain completions (dispatch continuations, recycle entries),
//! then move queued entries into free submission slots, then flush. If the
//! submission queue is full the remainder stays queued for the next tick,
//! in order.

use std::collections::VecDeque;
use std::ffi::CString;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{OpError, TransportError};
use crate::op::{
    ExchangeEntry, FileStat, IoBuffer, OpCompletion, OperationPool, SocketRequest, SpliceRequest,
    DEFAULT_STAT_MASK,
};
use crate::promise::Promise;
use crate::registry::CompletionRegistry;
use crate::ring::{RingConfig, RingFull, RingTransport};

/// Reactor tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Submission queue depth to request from the kernel.
    pub queue_depth: u32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self { queue_depth: 128 }
    }
}

/// Proactor over the kernel completion ring.
pub struct Reactor {
    transport: RingTransport,
    registry: CompletionRegistry<Box<ExchangeEntry>>,
    pool: OperationPool,
    pending: VecDeque<Box<ExchangeEntry>>,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> Result<Self, TransportError> {
        let transport = RingTransport::new(RingConfig {
            depth: config.queue_depth,
        })?;
        let capacity = transport.capacity() as usize;
        Ok(Self {
            transport,
            registry: CompletionRegistry::with_capacity(capacity),
            pool: OperationPool::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(ReactorConfig::default())
    }

    /// One scheduling cycle: dispatch what completed, submit what fits,
    /// hand the batch to the kernel.
    pub fn tick(&mut self) -> Result<(), TransportError> {
        let Self {
            transport,
            registry,
            pool,
            pending,
        } = self;

        let drained = transport.drain_completions(|token, res, flags| {
            match registry.release(token) {
                Some(mut entry) => {
                    entry.complete(res, flags);
                    pool.release(entry);
                }
                // Duplicate or stale token; nothing to dispatch.
                None => debug!(token, res, "completion without a registered handler"),
            }
        });
        if drained > 0 {
            trace!(drained, "completions dispatched");
        }

        while let Some(front) = pending.front() {
            // A linked head and its companion timeout must land in
            // adjacent slots of the same batch.
            let needed = if front.is_linked_head() { 2 } else { 1 };
            if transport.sq_space_left() < needed {
                break;
            }
            for _ in 0..needed {
                if let Some(entry) = pending.pop_front() {
                    Self::submit_one(transport, registry, pending, entry);
                }
            }
        }

        self.transport.flush()?;
        Ok(())
    }

    fn submit_one(
        transport: &mut RingTransport,
        registry: &mut CompletionRegistry<Box<ExchangeEntry>>,
        pending: &mut VecDeque<Box<ExchangeEntry>>,
        entry: Box<ExchangeEntry>,
    ) {
        let token = registry.insert(entry);
        let sqe = match registry.get_mut(token) {
            Some(entry) => entry.encode(token),
            None => return,
        };
        // Safety: the registry keeps the entry (and all memory the slot
        // points at) alive until its completion is drained.
        if unsafe { transport.push(&sqe) } == Err(RingFull) {
            if let Some(entry) = registry.release(token) {
                pending.push_front(entry);
            }
        }
    }

    /// Entries queued but not yet submitted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Operations currently submitted and awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// True when no operation is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.registry.in_flight() == 0
    }

    fn enqueue(&mut self, entry: Box<ExchangeEntry>, timeout: Option<Duration>) {
        self.pending.push_back(entry);
        if let Some(limit) = timeout {
            let companion = self.pool.link_timeout(limit);
            self.pending.push_back(companion);
        }
    }

    /// No-op round trip through the ring; completes with `()`.
    pub fn nop(&mut self) -> Promise<()> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_nop(complete);
        self.enqueue(entry, None);
        promise
    }

    /// Timer expiring after `duration`; completes with the elapsed time.
    pub fn delay(&mut self, duration: Duration) -> Promise<Duration> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_delay(duration, complete);
        self.enqueue(entry, None);
        promise
    }

    /// Reads into `buffer` at `offset`; completes with the buffer and the
    /// byte count, or `EndOfStream` on a zero-byte read.
    pub fn read(
        &mut self,
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        timeout: Option<Duration>,
    ) -> Promise<(IoBuffer, usize)> {
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_read(fd, buffer, offset, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Writes the used portion of `buffer` at `offset`.
    pub fn write(
        &mut self,
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        timeout: Option<Duration>,
    ) -> Promise<(IoBuffer, usize)> {
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_write(fd, buffer, offset, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Scatter read into every buffer's full capacity, in order.
    pub fn read_vector(
        &mut self,
        fd: RawFd,
        buffers: Vec<IoBuffer>,
        offset: u64,
        timeout: Option<Duration>,
    ) -> Promise<(Vec<IoBuffer>, usize)> {
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_read_vector(fd, buffers, offset, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Gather write of every buffer's used portion, in order.
    pub fn write_vector(
        &mut self,
        fd: RawFd,
        buffers: Vec<IoBuffer>,
        offset: u64,
        timeout: Option<Duration>,
    ) -> Promise<(Vec<IoBuffer>, usize)> {
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_write_vector(fd, buffers, offset, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Opens `path` relative to the current directory.
    pub fn open(
        &mut self,
        path: impl AsRef<Path>,
        flags: i32,
        mode: u32,
        timeout: Option<Duration>,
    ) -> Promise<RawFd> {
        let path = match path_to_cstring(path.as_ref()) {
            Ok(path) => path,
            Err(error) => return Promise::resolved(Err(error)),
        };
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_open(path, flags, mode, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    pub fn close(&mut self, fd: RawFd, timeout: Option<Duration>) -> Promise<()> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_close(fd, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// File metadata for `path`, symlinks followed.
    pub fn stat_path(&mut self, path: impl AsRef<Path>) -> Promise<FileStat> {
        let path = match path_to_cstring(path.as_ref()) {
            Ok(path) => path,
            Err(error) => return Promise::resolved(Err(error)),
        };
        let (promise, complete) = promise_pair();
        let entry = self
            .pool
            .for_stat(libc::AT_FDCWD, path, 0, DEFAULT_STAT_MASK, complete);
        self.enqueue(entry, None);
        promise
    }

    /// File metadata for an already open descriptor.
    pub fn stat_fd(&mut self, fd: RawFd) -> Promise<FileStat> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_stat(
            fd,
            CString::default(),
            libc::AT_EMPTY_PATH,
            DEFAULT_STAT_MASK,
            complete,
        );
        self.enqueue(entry, None);
        promise
    }

    /// Accepts one connection; completes with the connection descriptor
    /// and the peer address.
    pub fn accept(&mut self, fd: RawFd) -> Promise<(RawFd, SocketAddr)> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_accept(fd, libc::SOCK_CLOEXEC, complete);
        self.enqueue(entry, None);
        promise
    }

    /// Connects `fd` to `peer`; completes with the same descriptor.
    pub fn connect(
        &mut self,
        fd: RawFd,
        peer: SocketAddr,
        timeout: Option<Duration>,
    ) -> Promise<RawFd> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_connect(fd, peer, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Kernel-side copy between two descriptors.
    pub fn splice(
        &mut self,
        request: SpliceRequest,
        timeout: Option<Duration>,
    ) -> Promise<usize> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_splice(request, timeout.is_some(), complete);
        self.enqueue(entry, timeout);
        promise
    }

    /// Creates a socket locally, delivered through the completion path so
    /// ordering relative to other operations is preserved.
    pub fn socket(&mut self, request: SocketRequest) -> Promise<RawFd> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_socket(request, complete);
        self.enqueue(entry, None);
        promise
    }

    /// Creates, binds and starts a listener; completes with the descriptor
    /// and the actually bound address.
    pub fn listen(&mut self, addr: SocketAddr, backlog: u32) -> Promise<(RawFd, SocketAddr)> {
        let (promise, complete) = promise_pair();
        let entry = self.pool.for_listen(addr, backlog, complete);
        self.enqueue(entry, None);
        promise
    }
}

fn promise_pair<V: Send + 'static>() -> (Promise<V>, OpCompletion<V>) {
    let promise = Promise::new();
    let resolver = promise.clone();
    let complete: OpCompletion<V> = Box::new(move |outcome| {
        resolver.resolve(outcome);
    });
    (promise, complete)
}

fn path_to_cstring(path: &Path) -> Result<CString, OpError> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).map_err(|_| OpError::Os(libc::EINVAL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_nul_paths_fail_without_touching_the_ring() {
        let mut reactor = match Reactor::with_defaults() {
            Ok(reactor) => reactor,
            Err(_) => return,
        };

        let promise = reactor.open(Path::new("bad\0name"), libc::O_RDONLY, 0, None);

        assert_eq!(promise.value(), Some(Err(OpError::Os(libc::EINVAL))));
        assert!(reactor.is_idle());
    }

    #[test]
    fn requests_queue_until_a_tick_runs() {
        let mut reactor = match Reactor::with_defaults() {
            Ok(reactor) => reactor,
            Err(_) => return,
        };

        let promise = reactor.nop();
        assert_eq!(reactor.pending(), 1);
        assert!(!promise.is_resolved());
    }

    #[test]
    fn stale_token_completion_is_skipped_without_stalling_the_batch() {
        let Ok(mut reactor) = Reactor::with_defaults() else {
            return;
        };

        // Stage a completion whose token was never registered; it lands in
        // the same drain batch as the real operation behind it.
        let ghost = io_uring::opcode::Nop::new().build().user_data(4096);
        if unsafe { reactor.transport.push(&ghost) }.is_err() {
            return;
        }

        let promise = reactor.nop();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !promise.is_resolved() {
            assert!(
                std::time::Instant::now() < deadline,
                "nop stalled behind a stale completion"
            );
            reactor.tick().expect("tick failed");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(promise.value(), Some(Ok(())));
        assert!(reactor.is_idle());
    }

    #[test]
    fn timeout_requests_queue_a_companion_entry() {
        let mut reactor = match Reactor::with_defaults() {
            Ok(reactor) => reactor,
            Err(_) => return,
        };

        reactor.read(
            0,
            IoBuffer::with_capacity(8),
            0,
            Some(Duration::from_millis(10)),
        );
        assert_eq!(reactor.pending(), 2);
    }
}
