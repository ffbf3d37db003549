//! Ring pair ownership and raw slot traffic.

use io_uring::{squeue, IoUring};
use tracing::info;

use crate::error::TransportError;

/// Smallest queue depth the transport will request.
const MIN_DEPTH: u32 = 1;
/// Largest queue depth the kernel accepts for a single ring.
const MAX_DEPTH: u32 = 32_768;

/// Transport tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Requested submission queue depth. Clamped to the kernel's accepted
    /// range and rounded up to a power of two before setup.
    pub depth: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { depth: 128 }
    }
}

/// Marker returned when the submission queue has no free slot.
///
/// Not an error in the transport sense: the caller is expected to flush
/// and retry on a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFull;

/// Owner of the kernel ring pair.
pub struct RingTransport {
    ring: IoUring,
    capacity: u32,
}

impl RingTransport {
    /// Sets up a ring of (at least) the configured depth.
    pub fn new(config: RingConfig) -> Result<Self, TransportError> {
        let requested = config
            .depth
            .clamp(MIN_DEPTH, MAX_DEPTH)
            .next_power_of_two();
        let ring = IoUring::new(requested).map_err(TransportError::Setup)?;
        let capacity = ring.params().sq_entries();
        info!(requested, capacity, "ring transport ready");
        Ok(Self { ring, capacity })
    }

    /// Submission queue depth actually granted by the kernel.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Free submission slots right now.
    pub fn sq_space_left(&mut self) -> usize {
        let sq = self.ring.submission();
        sq.capacity() - sq.len()
    }

    /// Places one encoded slot on the submission queue.
    ///
    /// # Safety
    ///
    /// Every pointer embedded in `entry` must stay valid until the
    /// matching completion has been observed. The registry upholds this
    /// by keeping the owning exchange entry alive while in flight.
    pub unsafe fn push(&mut self, entry: &squeue::Entry) -> Result<(), RingFull> {
        self.ring.submission().push(entry).map_err(|_| RingFull)
    }

    /// Hands queued submissions to the kernel.
    ///
    /// `EBUSY` means the completion side is saturated and the kernel wants
    /// us to drain before submitting more; that is reported as zero
    /// submitted, not as a fault.
    pub fn flush(&mut self) -> Result<usize, TransportError> {
        match self.ring.submit() {
            Ok(submitted) => Ok(submitted),
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => Ok(0),
            Err(err) => Err(TransportError::Flush(err)),
        }
    }

    /// Drains every visible completion, feeding `(token, result, flags)`
    /// triples to `observer`. Returns the number of completions consumed.
    pub fn drain_completions<F>(&mut self, mut observer: F) -> usize
    where
        F: FnMut(u64, i32, u32),
    {
        let mut cq = self.ring.completion();
        cq.sync();
        let mut drained = 0;
        for cqe in &mut cq {
            observer(cqe.user_data(), cqe.result(), cqe.flags());
            drained += 1;
        }
        cq.sync();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_available() -> bool {
        IoUring::new(2).is_ok()
    }

    #[test]
    fn grants_at_least_the_requested_depth() {
        if !ring_available() {
            return;
        }
        let transport = RingTransport::new(RingConfig { depth: 100 }).unwrap();
        assert!(transport.capacity() >= 100);
    }

    #[test]
    fn push_reports_full_queue_instead_of_failing() {
        if !ring_available() {
            return;
        }
        let mut transport = RingTransport::new(RingConfig { depth: 2 }).unwrap();
        let capacity = transport.sq_space_left();

        for token in 0..capacity as u64 {
            let sqe = io_uring::opcode::Nop::new().build().user_data(token);
            assert_eq!(unsafe { transport.push(&sqe) }, Ok(()));
        }

        let overflow = io_uring::opcode::Nop::new().build().user_data(99);
        assert_eq!(unsafe { transport.push(&overflow) }, Err(RingFull));
        assert_eq!(transport.sq_space_left(), 0);
    }

    #[test]
    fn nop_completion_echoes_the_token() {
        if !ring_available() {
            return;
        }
        let mut transport = RingTransport::new(RingConfig::default()).unwrap();
        let sqe = io_uring::opcode::Nop::new().build().user_data(7);
        unsafe { transport.push(&sqe) }.unwrap();
        transport.flush().unwrap();

        let mut seen = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while seen.is_empty() && std::time::Instant::now() < deadline {
            transport.drain_completions(|token, res, _| seen.push((token, res)));
        }
        assert_eq!(seen, vec![(7, 0)]);
    }
}
