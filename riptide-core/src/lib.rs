//! Riptide Core - completion-ring I/O reactor
//!
//! An asynchronous I/O core built directly on the kernel completion ring.
//! Callers request operations (file and socket I/O, timers, metadata) and
//! get a [`Promise`](promise::Promise) back; a single thread drives the
//! [`Reactor`](reactor::Reactor) tick loop that trades submission slots
//! and completions with the kernel.

/// Error taxonomy: transport faults vs per-operation outcomes
pub mod error;

/// Operation descriptors, buffers and the recycling pool
pub mod op;

/// Single-assignment result cells and combinators
pub mod promise;

/// Proactor loop and the operation submission surface
pub mod reactor;

/// Token registry for in-flight operations
pub mod registry;

/// Ownership layer over the kernel ring pair
pub mod ring;

pub use error::{OpError, TransportError};
pub use op::{FileStat, FileType, IoBuffer, SocketRequest, SpliceRequest};
pub use promise::{Outcome, Promise};
pub use reactor::{Reactor, ReactorConfig};
