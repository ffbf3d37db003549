//! Exchange entries: per-pending-operation descriptors.
//!
//! One enum variant per operation kind. An entry bundles the validated
//! parameters, the scratch memory the kernel needs at a stable address,
//! and the completion continuation that turns a raw ring result into a
//! typed outcome.
//!
//! Lifecycle protocol, enforced by [`OperationPool`](super::pool::OperationPool)
//! and the reactor: alloc -> prepare -> register -> encode -> exactly one
//! completion -> decode -> release. The continuation is populated only
//! between prepare and decode and is cleared on release, so a pooled entry
//! never extends the lifetime of captured buffers.

use std::ffi::CString;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use io_uring::{opcode, squeue, types};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::OpError;
use crate::op::buffers::{IoBuffer, IoVecArray, SockAddrBuffer};
use crate::op::stat::FileStat;
use crate::promise::Outcome;
use crate::registry::Token;

/// Completion continuation delivering a typed outcome to the caller side.
pub type OpCompletion<V> = Box<dyn FnOnce(Outcome<V>) + Send>;

/// Operation kinds, one per exchange entry variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Nop,
    Delay,
    Read,
    Write,
    ReadVector,
    WriteVector,
    Open,
    Close,
    Stat,
    Accept,
    Connect,
    Splice,
    Socket,
    Listen,
    LinkTimeout,
}

impl OpKind {
    pub(crate) const COUNT: usize = 15;

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Parameters of a splice operation. `None` offsets mean "current position"
/// (pipe ends require it).
#[derive(Debug, Clone, Copy)]
pub struct SpliceRequest {
    pub fd_in: RawFd,
    pub off_in: Option<u64>,
    pub fd_out: RawFd,
    pub off_out: Option<u64>,
    pub len: u32,
    pub flags: u32,
}

/// Parameters for local socket construction.
#[derive(Debug, Clone, Copy)]
pub struct SocketRequest {
    pub domain: Domain,
    pub ty: Type,
    pub protocol: Option<Protocol>,
}

impl SocketRequest {
    pub fn stream_v4() -> Self {
        Self {
            domain: Domain::IPV4,
            ty: Type::STREAM,
            protocol: None,
        }
    }

    pub fn stream_v6() -> Self {
        Self {
            domain: Domain::IPV6,
            ty: Type::STREAM,
            protocol: None,
        }
    }
}

/// Tagged union over every operation the reactor can have in flight.
pub enum ExchangeEntry {
    Nop {
        complete: Option<OpCompletion<()>>,
    },
    Delay {
        spec: Box<types::Timespec>,
        started: Instant,
        complete: Option<OpCompletion<Duration>>,
    },
    Read {
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        linked: bool,
        complete: Option<OpCompletion<(IoBuffer, usize)>>,
    },
    Write {
        fd: RawFd,
        buffer: IoBuffer,
        offset: u64,
        linked: bool,
        complete: Option<OpCompletion<(IoBuffer, usize)>>,
    },
    ReadVector {
        fd: RawFd,
        buffers: Vec<IoBuffer>,
        iovec: IoVecArray,
        offset: u64,
        linked: bool,
        complete: Option<OpCompletion<(Vec<IoBuffer>, usize)>>,
    },
    WriteVector {
        fd: RawFd,
        buffers: Vec<IoBuffer>,
        iovec: IoVecArray,
        offset: u64,
        linked: bool,
        complete: Option<OpCompletion<(Vec<IoBuffer>, usize)>>,
    },
    Open {
        path: CString,
        flags: i32,
        mode: u32,
        linked: bool,
        complete: Option<OpCompletion<RawFd>>,
    },
    Close {
        fd: RawFd,
        linked: bool,
        complete: Option<OpCompletion<()>>,
    },
    Stat {
        dirfd: RawFd,
        path: CString,
        flags: i32,
        mask: u32,
        output: Option<Box<libc::statx>>,
        complete: Option<OpCompletion<FileStat>>,
    },
    Accept {
        fd: RawFd,
        flags: i32,
        peer: SockAddrBuffer,
        complete: Option<OpCompletion<(RawFd, SocketAddr)>>,
    },
    Connect {
        fd: RawFd,
        addr: SockAddrBuffer,
        linked: bool,
        complete: Option<OpCompletion<RawFd>>,
    },
    Splice {
        request: SpliceRequest,
        linked: bool,
        complete: Option<OpCompletion<usize>>,
    },
    /// Local setup op: rides the NOP delivery path, result computed in
    /// decode without kernel interpretation.
    Socket {
        request: SocketRequest,
        complete: Option<OpCompletion<RawFd>>,
    },
    /// Local setup op: socket + bind + listen chain on the NOP path.
    Listen {
        addr: SocketAddr,
        backlog: u32,
        complete: Option<OpCompletion<(RawFd, SocketAddr)>>,
    },
    /// Companion entry racing a linked primary operation; carries no
    /// continuation of its own.
    LinkTimeout {
        spec: Box<types::Timespec>,
    },
}

impl ExchangeEntry {
    /// Blank entry of the given kind, ready for a prepare call.
    pub(crate) fn fresh(kind: OpKind) -> Self {
        match kind {
            OpKind::Nop => ExchangeEntry::Nop { complete: None },
            OpKind::Delay => ExchangeEntry::Delay {
                spec: Box::new(types::Timespec::new()),
                started: Instant::now(),
                complete: None,
            },
            OpKind::Read => ExchangeEntry::Read {
                fd: -1,
                buffer: IoBuffer::default(),
                offset: 0,
                linked: false,
                complete: None,
            },
            OpKind::Write => ExchangeEntry::Write {
                fd: -1,
                buffer: IoBuffer::default(),
                offset: 0,
                linked: false,
                complete: None,
            },
            OpKind::ReadVector => ExchangeEntry::ReadVector {
                fd: -1,
                buffers: Vec::new(),
                iovec: IoVecArray::empty(),
                offset: 0,
                linked: false,
                complete: None,
            },
            OpKind::WriteVector => ExchangeEntry::WriteVector {
                fd: -1,
                buffers: Vec::new(),
                iovec: IoVecArray::empty(),
                offset: 0,
                linked: false,
                complete: None,
            },
            OpKind::Open => ExchangeEntry::Open {
                path: CString::default(),
                flags: 0,
                mode: 0,
                linked: false,
                complete: None,
            },
            OpKind::Close => ExchangeEntry::Close {
                fd: -1,
                linked: false,
                complete: None,
            },
            OpKind::Stat => ExchangeEntry::Stat {
                dirfd: libc::AT_FDCWD,
                path: CString::default(),
                flags: 0,
                mask: 0,
                output: None,
                complete: None,
            },
            OpKind::Accept => ExchangeEntry::Accept {
                fd: -1,
                flags: 0,
                peer: SockAddrBuffer::new(),
                complete: None,
            },
            OpKind::Connect => ExchangeEntry::Connect {
                fd: -1,
                addr: SockAddrBuffer::new(),
                linked: false,
                complete: None,
            },
            OpKind::Splice => ExchangeEntry::Splice {
                request: SpliceRequest {
                    fd_in: -1,
                    off_in: None,
                    fd_out: -1,
                    off_out: None,
                    len: 0,
                    flags: 0,
                },
                linked: false,
                complete: None,
            },
            OpKind::Socket => ExchangeEntry::Socket {
                request: SocketRequest::stream_v4(),
                complete: None,
            },
            OpKind::Listen => ExchangeEntry::Listen {
                addr: SocketAddr::from(([0, 0, 0, 0], 0)),
                backlog: 0,
                complete: None,
            },
            OpKind::LinkTimeout => ExchangeEntry::LinkTimeout {
                spec: Box::new(types::Timespec::new()),
            },
        }
    }

    pub(crate) fn kind(&self) -> OpKind {
        match self {
            ExchangeEntry::Nop { .. } => OpKind::Nop,
            ExchangeEntry::Delay { .. } => OpKind::Delay,
            ExchangeEntry::Read { .. } => OpKind::Read,
            ExchangeEntry::Write { .. } => OpKind::Write,
            ExchangeEntry::ReadVector { .. } => OpKind::ReadVector,
            ExchangeEntry::WriteVector { .. } => OpKind::WriteVector,
            ExchangeEntry::Open { .. } => OpKind::Open,
            ExchangeEntry::Close { .. } => OpKind::Close,
            ExchangeEntry::Stat { .. } => OpKind::Stat,
            ExchangeEntry::Accept { .. } => OpKind::Accept,
            ExchangeEntry::Connect { .. } => OpKind::Connect,
            ExchangeEntry::Splice { .. } => OpKind::Splice,
            ExchangeEntry::Socket { .. } => OpKind::Socket,
            ExchangeEntry::Listen { .. } => OpKind::Listen,
            ExchangeEntry::LinkTimeout { .. } => OpKind::LinkTimeout,
        }
    }

    /// Whether this entry is the head of a linked pair and must be
    /// followed by its companion timeout in the next submission slot.
    pub(crate) fn is_linked_head(&self) -> bool {
        match self {
            ExchangeEntry::Read { linked, .. }
            | ExchangeEntry::Write { linked, .. }
            | ExchangeEntry::ReadVector { linked, .. }
            | ExchangeEntry::WriteVector { linked, .. }
            | ExchangeEntry::Open { linked, .. }
            | ExchangeEntry::Close { linked, .. }
            | ExchangeEntry::Connect { linked, .. }
            | ExchangeEntry::Splice { linked, .. } => *linked,
            _ => false,
        }
    }

    /// Whether a continuation is currently attached (prepare happened and
    /// the completion has not been dispatched yet).
    pub(crate) fn has_continuation(&self) -> bool {
        match self {
            ExchangeEntry::Nop { complete } => complete.is_some(),
            ExchangeEntry::Delay { complete, .. } => complete.is_some(),
            ExchangeEntry::Read { complete, .. } => complete.is_some(),
            ExchangeEntry::Write { complete, .. } => complete.is_some(),
            ExchangeEntry::ReadVector { complete, .. } => complete.is_some(),
            ExchangeEntry::WriteVector { complete, .. } => complete.is_some(),
            ExchangeEntry::Open { complete, .. } => complete.is_some(),
            ExchangeEntry::Close { complete, .. } => complete.is_some(),
            ExchangeEntry::Stat { complete, .. } => complete.is_some(),
            ExchangeEntry::Accept { complete, .. } => complete.is_some(),
            ExchangeEntry::Connect { complete, .. } => complete.is_some(),
            ExchangeEntry::Splice { complete, .. } => complete.is_some(),
            ExchangeEntry::Socket { complete, .. } => complete.is_some(),
            ExchangeEntry::Listen { complete, .. } => complete.is_some(),
            ExchangeEntry::LinkTimeout { .. } => false,
        }
    }

    /// Encodes this entry into a submission slot, stamping the correlation
    /// token into the user-data field.
    ///
    /// All pointers placed into the slot reference boxed storage owned by
    /// this entry, which the registry keeps alive until the completion is
    /// dispatched.
    pub(crate) fn encode(&mut self, token: Token) -> squeue::Entry {
        let (sqe, linked) = match self {
            ExchangeEntry::Nop { .. }
            | ExchangeEntry::Socket { .. }
            | ExchangeEntry::Listen { .. } => (opcode::Nop::new().build(), false),

            ExchangeEntry::Delay { spec, started, .. } => {
                *started = Instant::now();
                (
                    opcode::Timeout::new(&**spec as *const types::Timespec).build(),
                    false,
                )
            }

            ExchangeEntry::Read {
                fd,
                buffer,
                offset,
                linked,
                ..
            } => (
                opcode::Read::new(types::Fd(*fd), buffer.as_mut_ptr(), buffer.capacity() as u32)
                    .offset(*offset)
                    .build(),
                *linked,
            ),

            ExchangeEntry::Write {
                fd,
                buffer,
                offset,
                linked,
                ..
            } => (
                opcode::Write::new(types::Fd(*fd), buffer.as_ptr(), buffer.used() as u32)
                    .offset(*offset)
                    .build(),
                *linked,
            ),

            ExchangeEntry::ReadVector {
                fd,
                iovec,
                offset,
                linked,
                ..
            } => (
                opcode::Readv::new(types::Fd(*fd), iovec.as_ptr(), iovec.count())
                    .offset(*offset)
                    .build(),
                *linked,
            ),

            ExchangeEntry::WriteVector {
                fd,
                iovec,
                offset,
                linked,
                ..
            } => (
                opcode::Writev::new(types::Fd(*fd), iovec.as_ptr(), iovec.count())
                    .offset(*offset)
                    .build(),
                *linked,
            ),

            ExchangeEntry::Open {
                path,
                flags,
                mode,
                linked,
                ..
            } => (
                opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path.as_ptr())
                    .flags(*flags)
                    .mode(*mode)
                    .build(),
                *linked,
            ),

            ExchangeEntry::Close { fd, linked, .. } => {
                (opcode::Close::new(types::Fd(*fd)).build(), *linked)
            }

            ExchangeEntry::Stat {
                dirfd,
                path,
                flags,
                mask,
                output,
                ..
            } => {
                let statx_ptr = output
                    .as_deref_mut()
                    .map(|raw| raw as *mut libc::statx)
                    .unwrap_or(std::ptr::null_mut());
                (
                    opcode::Statx::new(types::Fd(*dirfd), path.as_ptr(), statx_ptr as *mut _)
                        .flags(*flags)
                        .mask(*mask)
                        .build(),
                    false,
                )
            }

            ExchangeEntry::Accept {
                fd, flags, peer, ..
            } => (
                opcode::Accept::new(types::Fd(*fd), peer.sockaddr_ptr(), peer.socklen_ptr())
                    .flags(*flags)
                    .build(),
                false,
            ),

            ExchangeEntry::Connect {
                fd, addr, linked, ..
            } => (
                opcode::Connect::new(
                    types::Fd(*fd),
                    addr.sockaddr_ptr() as *const libc::sockaddr,
                    addr.socklen(),
                )
                .build(),
                *linked,
            ),

            ExchangeEntry::Splice {
                request, linked, ..
            } => (
                opcode::Splice::new(
                    types::Fd(request.fd_in),
                    request.off_in.map_or(-1, |off| off as i64),
                    types::Fd(request.fd_out),
                    request.off_out.map_or(-1, |off| off as i64),
                    request.len,
                )
                .flags(request.flags)
                .build(),
                *linked,
            ),

            ExchangeEntry::LinkTimeout { spec } => (
                opcode::LinkTimeout::new(&**spec as *const types::Timespec).build(),
                false,
            ),
        };

        let sqe = sqe.user_data(token);
        if linked {
            sqe.flags(squeue::Flags::IO_LINK)
        } else {
            sqe
        }
    }

    /// Decodes a raw completion into the typed outcome and dispatches the
    /// continuation. Called exactly once per completion; the continuation
    /// is consumed here.
    pub(crate) fn complete(&mut self, res: i32, _cqe_flags: u32) {
        match self {
            ExchangeEntry::Nop { complete } => {
                if let Some(callback) = complete.take() {
                    callback(Ok(()));
                }
            }

            ExchangeEntry::Delay {
                started, complete, ..
            } => {
                if let Some(callback) = complete.take() {
                    // The "timer expired" sentinel is the success path for
                    // a pure delay.
                    let outcome = if res == -libc::ETIME {
                        Ok(started.elapsed())
                    } else {
                        Err(OpError::Os(res.unsigned_abs() as i32))
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Read {
                buffer, complete, ..
            } => {
                if let Some(callback) = complete.take() {
                    callback(decode_read(res, mem::take(buffer)));
                }
            }

            ExchangeEntry::Write {
                buffer, complete, ..
            } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res < 0 {
                        Err(OpError::from_raw(res))
                    } else {
                        Ok((mem::take(buffer), res as usize))
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::ReadVector {
                buffers,
                iovec,
                complete,
                ..
            } => {
                *iovec = IoVecArray::empty();
                if let Some(callback) = complete.take() {
                    callback(decode_read_vector(res, mem::take(buffers)));
                }
            }

            ExchangeEntry::WriteVector {
                buffers,
                iovec,
                complete,
                ..
            } => {
                *iovec = IoVecArray::empty();
                if let Some(callback) = complete.take() {
                    let outcome = if res < 0 {
                        Err(OpError::from_raw(res))
                    } else {
                        Ok((mem::take(buffers), res as usize))
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Open { complete, .. } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res < 0 {
                        Err(OpError::from_raw(res))
                    } else {
                        Ok(res as RawFd)
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Close { complete, .. } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res == 0 {
                        Ok(())
                    } else {
                        Err(OpError::Os(res.unsigned_abs() as i32))
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Stat {
                output, complete, ..
            } => {
                // Scratch is dropped either way.
                let raw = output.take();
                if let Some(callback) = complete.take() {
                    let outcome = match (res, raw) {
                        (res, _) if res < 0 => Err(OpError::from_raw(res)),
                        (_, Some(raw)) => Ok(FileStat::from_statx(&raw)),
                        (_, None) => Err(OpError::Os(libc::EINVAL)),
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Accept { peer, complete, .. } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res <= 0 {
                        Err(OpError::Os(if res == 0 {
                            libc::EINVAL
                        } else {
                            -res
                        }))
                    } else {
                        match peer.decode() {
                            Some(addr) => Ok((res as RawFd, addr)),
                            None => Err(OpError::Os(libc::EAFNOSUPPORT)),
                        }
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Connect { fd, complete, .. } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res < 0 {
                        Err(OpError::from_raw(res))
                    } else {
                        Ok(*fd)
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Splice { complete, .. } => {
                if let Some(callback) = complete.take() {
                    let outcome = if res < 0 {
                        Err(OpError::from_raw(res))
                    } else {
                        Ok(res as usize)
                    };
                    callback(outcome);
                }
            }

            ExchangeEntry::Socket { request, complete } => {
                if let Some(callback) = complete.take() {
                    callback(create_socket(request));
                }
            }

            ExchangeEntry::Listen {
                addr,
                backlog,
                complete,
            } => {
                if let Some(callback) = complete.take() {
                    callback(create_listener(*addr, *backlog));
                }
            }

            ExchangeEntry::LinkTimeout { .. } => {}
        }
    }

    /// Clears the continuation and drops per-invocation scratch so the
    /// pooled entry holds no captured state between uses.
    pub(crate) fn clear(&mut self) {
        match self {
            ExchangeEntry::Nop { complete } => *complete = None,
            ExchangeEntry::Delay { complete, .. } => *complete = None,
            ExchangeEntry::Read {
                buffer, complete, ..
            } => {
                *buffer = IoBuffer::default();
                *complete = None;
            }
            ExchangeEntry::Write {
                buffer, complete, ..
            } => {
                *buffer = IoBuffer::default();
                *complete = None;
            }
            ExchangeEntry::ReadVector {
                buffers,
                iovec,
                complete,
                ..
            } => {
                buffers.clear();
                *iovec = IoVecArray::empty();
                *complete = None;
            }
            ExchangeEntry::WriteVector {
                buffers,
                iovec,
                complete,
                ..
            } => {
                buffers.clear();
                *iovec = IoVecArray::empty();
                *complete = None;
            }
            ExchangeEntry::Open { path, complete, .. } => {
                *path = CString::default();
                *complete = None;
            }
            ExchangeEntry::Close { complete, .. } => *complete = None,
            ExchangeEntry::Stat {
                path,
                output,
                complete,
                ..
            } => {
                *path = CString::default();
                *output = None;
                *complete = None;
            }
            // The peer-address scratch is pool-persistent; prepare resets it.
            ExchangeEntry::Accept { complete, .. } => *complete = None,
            ExchangeEntry::Connect { complete, .. } => *complete = None,
            ExchangeEntry::Splice { complete, .. } => *complete = None,
            ExchangeEntry::Socket { complete, .. } => *complete = None,
            ExchangeEntry::Listen { complete, .. } => *complete = None,
            ExchangeEntry::LinkTimeout { .. } => {}
        }
    }
}

fn decode_read(res: i32, mut buffer: IoBuffer) -> Outcome<(IoBuffer, usize)> {
    if res == 0 {
        // Zero-byte read is a distinct signal, not a success.
        Err(OpError::EndOfStream)
    } else if res > 0 {
        buffer.set_used(res as usize);
        Ok((buffer, res as usize))
    } else {
        Err(OpError::from_raw(res))
    }
}

fn decode_read_vector(res: i32, mut buffers: Vec<IoBuffer>) -> Outcome<(Vec<IoBuffer>, usize)> {
    if res == 0 {
        return Err(OpError::EndOfStream);
    }
    if res < 0 {
        return Err(OpError::from_raw(res));
    }

    // Distribute the transferred byte count over the buffers in order.
    let mut remaining = res as usize;
    for buffer in buffers.iter_mut() {
        let filled = remaining.min(buffer.capacity());
        buffer.set_used(filled);
        remaining -= filled;
    }
    Ok((buffers, res as usize))
}

fn create_socket(request: &SocketRequest) -> Outcome<RawFd> {
    use std::os::unix::io::IntoRawFd;

    Socket::new(request.domain, request.ty, request.protocol)
        .map(|socket| socket.into_raw_fd())
        .map_err(io_to_op_error)
}

fn create_listener(addr: SocketAddr, backlog: u32) -> Outcome<(RawFd, SocketAddr)> {
    use std::os::unix::io::IntoRawFd;

    let build = || -> std::io::Result<(RawFd, SocketAddr)> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;
        let bound = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| std::io::Error::from_raw_os_error(libc::EAFNOSUPPORT))?;
        Ok((socket.into_raw_fd(), bound))
    };
    build().map_err(io_to_op_error)
}

fn io_to_op_error(err: std::io::Error) -> OpError {
    OpError::Os(err.raw_os_error().unwrap_or(libc::EINVAL))
}

/// Builds the kernel timespec for a delay or linked timeout.
pub(crate) fn timespec_for(duration: Duration) -> types::Timespec {
    types::Timespec::new()
        .sec(duration.as_secs())
        .nsec(duration.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::pool::OperationPool;
    use std::sync::{Arc, Mutex};

    fn capture<V: Send + 'static>() -> (Arc<Mutex<Option<Outcome<V>>>>, OpCompletion<V>) {
        let slot = Arc::new(Mutex::new(None));
        let probe = Arc::clone(&slot);
        let callback: OpCompletion<V> = Box::new(move |outcome| {
            *probe.lock().unwrap() = Some(outcome);
        });
        (slot, callback)
    }

    #[test]
    fn zero_byte_read_is_end_of_stream() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_read(3, IoBuffer::with_capacity(16), 0, false, callback);

        entry.complete(0, 0);

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Err(OpError::EndOfStream)),
        );
    }

    #[test]
    fn positive_read_marks_bytes_used() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_read(3, IoBuffer::with_capacity(16), 0, false, callback);

        entry.complete(5, 0);

        match seen.lock().unwrap().take() {
            Some(Ok((buffer, count))) => {
                assert_eq!(count, 5);
                assert_eq!(buffer.used(), 5);
            }
            other => panic!("unexpected outcome: {:?}", other.map(|o| o.map(|_| ()))),
        };
    }

    #[test]
    fn negative_read_carries_the_os_code() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_read(3, IoBuffer::with_capacity(16), 0, false, callback);

        entry.complete(-libc::EBADF, 0);

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Err(OpError::Os(libc::EBADF))),
        );
    }

    #[test]
    fn delay_sentinel_is_success_with_elapsed_time() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_delay(Duration::from_millis(1), callback);

        entry.complete(-libc::ETIME, 0);

        assert!(matches!(seen.lock().unwrap().take(), Some(Ok(_))));
    }

    #[test]
    fn delay_with_other_error_is_failure() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_delay(Duration::from_millis(1), callback);

        entry.complete(-libc::ECANCELED, 0);

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Err(OpError::Os(libc::ECANCELED))),
        );
    }

    #[test]
    fn close_succeeds_only_on_zero() {
        let mut pool = OperationPool::new();

        let (ok_seen, callback) = capture();
        pool.for_close(3, false, callback).complete(0, 0);
        assert_eq!(*ok_seen.lock().unwrap(), Some(Ok(())));

        let (err_seen, callback) = capture();
        pool.for_close(3, false, callback).complete(-libc::EBADF, 0);
        assert_eq!(
            *err_seen.lock().unwrap(),
            Some(Err(OpError::Os(libc::EBADF))),
        );
    }

    #[test]
    fn accept_failure_on_non_positive_result() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_accept(5, 0, callback);

        entry.complete(-libc::ECONNABORTED, 0);

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Err(OpError::Os(libc::ECONNABORTED))),
        );
    }

    #[test]
    fn vector_read_distributes_used_bytes_in_order() {
        let buffers = vec![IoBuffer::with_capacity(4), IoBuffer::with_capacity(8)];
        let (buffers, count) = decode_read_vector(6, buffers).unwrap();

        assert_eq!(count, 6);
        assert_eq!(buffers[0].used(), 4);
        assert_eq!(buffers[1].used(), 2);
    }

    #[test]
    fn socket_op_resolves_from_local_data() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let mut entry = pool.for_socket(SocketRequest::stream_v4(), callback);

        // Result value of the NOP carrier is irrelevant.
        entry.complete(0, 0);

        match seen.lock().unwrap().take() {
            Some(Ok(fd)) => {
                assert!(fd >= 0);
                unsafe { libc::close(fd) };
            }
            other => panic!("socket construction failed: {:?}", other),
        };
    }

    #[test]
    fn listener_binds_and_reports_actual_port() {
        let mut pool = OperationPool::new();
        let (seen, callback) = capture();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut entry = pool.for_listen(addr, 8, callback);

        entry.complete(0, 0);

        match seen.lock().unwrap().take() {
            Some(Ok((fd, bound))) => {
                assert!(bound.port() != 0);
                unsafe { libc::close(fd) };
            }
            other => panic!("listen failed: {:?}", other),
        };
    }
}
