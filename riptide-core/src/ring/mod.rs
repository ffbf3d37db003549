//! Thin ownership layer over the kernel completion ring.
//!
//! [`RingTransport`] wraps the ring pair (submission and completion
//! queues) behind a safe-ish surface: slot-space accounting, push with
//! explicit backpressure, flush, and completion draining. Everything
//! above this layer works with correlation tokens and typed entries,
//! never with raw queue memory.

mod transport;

pub use transport::{RingConfig, RingFull, RingTransport};
