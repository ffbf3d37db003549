//! Stable-address scratch buffers handed to the kernel.
//!
//! Everything the kernel writes into (or reads from) asynchronously must
//! keep its address fixed between submission and completion. All buffer
//! types here own boxed storage, so moving the surrounding exchange entry
//! never moves the memory a submission slot points at.

use std::mem;
use std::net::SocketAddr;

/// Owned byte buffer with a used-bytes watermark.
///
/// Operations take the buffer by value and return it through the promise
/// outcome together with the transferred byte count, so ownership is
/// unambiguous while the kernel holds the pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoBuffer {
    data: Box<[u8]>,
    used: usize,
}

impl IoBuffer {
    /// Creates a zeroed buffer of the given capacity with nothing used.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    /// Creates a buffer holding a copy of `content`, fully used.
    pub fn from_slice(content: &[u8]) -> Self {
        Self {
            data: content.to_vec().into_boxed_slice(),
            used: content.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes considered consumed/filled by the last operation.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn set_used(&mut self, used: usize) {
        self.used = used.min(self.data.len());
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// The used portion of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.used]
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

impl From<Vec<u8>> for IoBuffer {
    fn from(data: Vec<u8>) -> Self {
        let used = data.len();
        Self {
            data: data.into_boxed_slice(),
            used,
        }
    }
}

/// Socket address scratch for accept/connect submissions.
///
/// Holds a boxed `sockaddr_storage` plus its length cell; the kernel
/// fills both on accept. The buffer is pool-persistent: reset and reused
/// across prepare calls instead of being reallocated per operation.
pub struct SockAddrBuffer {
    storage: Box<libc::sockaddr_storage>,
    len: Box<libc::socklen_t>,
}

impl SockAddrBuffer {
    pub(crate) fn new() -> Self {
        Self {
            storage: Box::new(unsafe { mem::zeroed() }),
            len: Box::new(mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t),
        }
    }

    /// Clears any previous peer address before the next accept.
    pub(crate) fn reset(&mut self) {
        *self.storage = unsafe { mem::zeroed() };
        *self.len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    }

    /// Copies `addr` into the storage (connect direction).
    pub(crate) fn fill(&mut self, addr: SocketAddr) {
        self.reset();
        let encoded = socket2::SockAddr::from(addr);
        // Safety: sockaddr_storage is at least as large as any sockaddr
        // variant socket2 produces.
        unsafe {
            std::ptr::copy_nonoverlapping(
                encoded.as_ptr() as *const u8,
                &mut *self.storage as *mut libc::sockaddr_storage as *mut u8,
                encoded.len() as usize,
            );
        }
        *self.len = encoded.len();
    }

    /// Interprets the stored bytes as a socket address, if the family is
    /// one we understand.
    pub(crate) fn decode(&self) -> Option<SocketAddr> {
        // Safety: storage/len were filled either by us or by the kernel.
        let addr = unsafe { socket2::SockAddr::new(*self.storage, *self.len) };
        addr.as_socket()
    }

    pub(crate) fn sockaddr_ptr(&mut self) -> *mut libc::sockaddr {
        &mut *self.storage as *mut libc::sockaddr_storage as *mut libc::sockaddr
    }

    pub(crate) fn socklen_ptr(&mut self) -> *mut libc::socklen_t {
        &mut *self.len
    }

    pub(crate) fn socklen(&self) -> libc::socklen_t {
        *self.len
    }
}

/// Boxed iovec array for vectored reads and writes.
///
/// The iovec slots point into [`IoBuffer`] heap storage owned by the same
/// exchange entry, so the pointers stay valid for the whole flight of the
/// operation.
pub(crate) struct IoVecArray {
    vecs: Box<[libc::iovec]>,
}

impl IoVecArray {
    pub(crate) fn empty() -> Self {
        Self { vecs: Box::new([]) }
    }

    /// Full capacity of every buffer is offered to the kernel.
    pub(crate) fn for_read(buffers: &mut [IoBuffer]) -> Self {
        let vecs: Vec<libc::iovec> = buffers
            .iter_mut()
            .map(|buffer| libc::iovec {
                iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
                iov_len: buffer.capacity(),
            })
            .collect();
        Self {
            vecs: vecs.into_boxed_slice(),
        }
    }

    /// Only the used portion of every buffer is handed out.
    pub(crate) fn for_write(buffers: &[IoBuffer]) -> Self {
        let vecs: Vec<libc::iovec> = buffers
            .iter()
            .map(|buffer| libc::iovec {
                iov_base: buffer.as_ptr() as *mut libc::c_void,
                iov_len: buffer.used(),
            })
            .collect();
        Self {
            vecs: vecs.into_boxed_slice(),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const libc::iovec {
        self.vecs.as_ptr()
    }

    pub(crate) fn count(&self) -> u32 {
        self.vecs.len() as u32
    }
}
