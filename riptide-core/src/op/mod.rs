//! Operation descriptors and their recycling pool.
//!
//! The reactor never hands raw submission slots to callers. Every request
//! is captured as an [`ExchangeEntry`] carrying the parameters, kernel
//! scratch memory and the completion continuation, then pooled and reused
//! once its single completion has been dispatched.

mod buffers;
mod entry;
mod pool;
mod stat;

pub use buffers::IoBuffer;
pub use entry::{SocketRequest, SpliceRequest};
pub use stat::{FileStat, FileType, DEFAULT_STAT_MASK};

pub(crate) use entry::{ExchangeEntry, OpCompletion};
pub(crate) use pool::OperationPool;
