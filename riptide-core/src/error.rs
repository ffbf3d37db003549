//! Error taxonomy for the reactor.
//!
//! Two distinct families: [`TransportError`] covers ring setup and flush
//! faults and is fatal for the reactor, while [`OpError`] describes the
//! outcome of a single operation and only ever travels through the
//! [`Promise`](crate::promise::Promise) outcome channel.

use thiserror::Error;

/// Fatal faults of the ring transport itself.
///
/// Per-operation negative results are *not* transport failures; they are
/// reported on the completion ring and surface as [`OpError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Ring setup or registration failed. The reactor cannot start.
    #[error("io_uring setup failed: {0}")]
    Setup(#[source] std::io::Error),

    /// The submit syscall failed while flushing pending submissions.
    #[error("io_uring submit failed: {0}")]
    Flush(#[source] std::io::Error),
}

/// Outcome of a single asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    /// The kernel reported a negative result; the OS error code is kept.
    #[error("operation failed: {}", errno_name(*.0))]
    Os(i32),

    /// A read returned zero bytes. Distinct from failure; consumers that
    /// loop on reads must special-case this.
    #[error("end of stream")]
    EndOfStream,

    /// Every input of an `any_success` combinator failed.
    #[error("all alternatives failed")]
    AllFailed,

    /// Fallback outcome used when a bounded wait expired before resolution.
    #[error("wait timed out before resolution")]
    WaitTimeout,
}

impl OpError {
    /// Wraps a raw (negative) completion result as an OS failure.
    pub fn from_raw(res: i32) -> Self {
        OpError::Os(-res)
    }

    /// The OS error code, if this is an OS failure.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            OpError::Os(code) => Some(*code),
            _ => None,
        }
    }
}

/// Renders an errno value together with its symbolic name when known.
fn errno_name(code: i32) -> String {
    let err = std::io::Error::from_raw_os_error(code);
    format!("os error {code} ({err})")
}
