//! Single-assignment asynchronous result cell.
//!
//! A [`Promise`] is the currency in which the reactor delivers operation
//! outcomes. It is resolved at most once, from whichever thread completes
//! the operation, while arbitrary other threads register continuations or
//! block on the result. State transitions use an atomic compare-and-set;
//! only the continuation queue itself is behind a mutex.

mod combine;

pub use combine::{
    all2, all3, all4, all5, all6, all7, all8, all9, all_vec, any, any_success,
};

use std::cell::UnsafeCell;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::Parker;

use crate::error::OpError;

/// Result of an asynchronous operation as stored in a [`Promise`].
pub type Outcome<T> = Result<T, OpError>;

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

const PENDING: u8 = 0;
const WRITING: u8 = 1;
const RESOLVED: u8 = 2;

struct Shared<T> {
    /// PENDING -> WRITING -> RESOLVED, driven by a single successful CAS.
    state: AtomicU8,

    /// Written exactly once, between WRITING and RESOLVED.
    outcome: UnsafeCell<Option<Outcome<T>>>,

    /// Continuations registered before resolution, fired in order.
    queue: Mutex<Vec<Continuation<T>>>,
}

// Safety: `outcome` is written only by the thread that won the PENDING ->
// WRITING transition and read only after observing RESOLVED with Acquire
// ordering. All other shared state is atomic or behind the mutex.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// Shareable handle to a single-assignment result cell.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a pending promise.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PENDING),
                outcome: UnsafeCell::new(None),
                queue: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates an already-resolved promise.
    pub fn resolved(outcome: Outcome<T>) -> Self {
        let promise = Self::new();
        promise.resolve(outcome);
        promise
    }

    /// Resolves the promise. The first call wins; later calls are no-ops
    /// and the stored outcome never changes.
    pub fn resolve(&self, outcome: Outcome<T>) -> &Self {
        if self
            .shared
            .state
            .compare_exchange(PENDING, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return self;
        }

        // Sole writer: we won the CAS above.
        unsafe {
            *self.shared.outcome.get() = Some(outcome);
        }
        self.shared.state.store(RESOLVED, Ordering::Release);

        // Registrations racing with us either enqueued before we take the
        // lock (drained here) or observe RESOLVED under the lock and run
        // immediately on their own thread.
        let ready = mem::take(&mut *self.lock_queue());
        let stored = self.outcome_ref();
        for continuation in ready {
            run_continuation(continuation, stored);
        }
        self
    }

    /// Resolves with a success value.
    pub fn ok(&self, value: T) -> &Self {
        self.resolve(Ok(value))
    }

    /// Resolves with a failure.
    pub fn fail(&self, error: OpError) -> &Self {
        self.resolve(Err(error))
    }

    /// Registers a continuation. Fires immediately (on the calling thread)
    /// if the promise is already resolved, otherwise at resolution time on
    /// the resolving thread. Continuations fire in registration order and
    /// a panicking continuation is contained and logged.
    ///
    /// A registration racing with resolution joins the queue as long as
    /// earlier registrations are still queued, so it cannot overtake them;
    /// once the resolver has taken the queue, a new continuation runs
    /// immediately on its own thread and orders only against itself.
    pub fn on_resolved(&self, action: impl FnOnce(&Outcome<T>) + Send + 'static) -> &Self {
        let mut queue = self.lock_queue();
        if self.shared.state.load(Ordering::Acquire) == RESOLVED && queue.is_empty() {
            drop(queue);
            run_continuation(Box::new(action), self.outcome_ref());
        } else {
            queue.push(Box::new(action));
        }
        self
    }

    /// Whether the promise has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RESOLVED
    }

    /// Clones out the stored outcome, if resolved.
    pub fn value(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.is_resolved().then(|| self.outcome_ref().clone())
    }

    /// Derives a promise holding the mapped success value. Failures are
    /// forwarded unchanged.
    pub fn map<U, F>(&self, transform: F) -> Promise<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let derived = Promise::new();
        let target = derived.clone();
        self.on_resolved(move |outcome| match outcome {
            Ok(value) => {
                target.ok(transform(value.clone()));
            }
            Err(error) => {
                target.fail(error.clone());
            }
        });
        derived
    }

    /// Derives a promise from a transform that itself returns a promise.
    /// The eventual outcome of the inner promise is forwarded, not
    /// double-wrapped.
    pub fn flat_map<U, F>(&self, transform: F) -> Promise<U>
    where
        T: Clone,
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let derived = Promise::new();
        let target = derived.clone();
        self.on_resolved(move |outcome| match outcome {
            Ok(value) => {
                transform(value.clone()).on_resolved(move |inner| {
                    target.resolve(inner.clone());
                });
            }
            Err(error) => {
                target.fail(error.clone());
            }
        });
        derived
    }

    /// Blocks the calling thread until the promise is resolved.
    ///
    /// Intended for tests and thread handoff points, not for reactor-thread
    /// code: nothing else in the core blocks.
    pub fn sync_wait(&self) -> &Self {
        if self.is_resolved() {
            return self;
        }

        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        self.on_resolved(move |_| unparker.unpark());

        while !self.is_resolved() {
            parker.park();
        }
        self
    }

    /// Blocks until resolution or until `timeout` elapses. Returns whether
    /// the promise was resolved; on `false` the promise simply stays
    /// pending and the caller may re-check later.
    pub fn sync_wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_resolved() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        self.on_resolved(move |_| unparker.unpark());

        while !self.is_resolved() {
            if Instant::now() >= deadline {
                return false;
            }
            parker.park_deadline(deadline);
        }
        true
    }

    /// Bounded wait with a fallback: if the promise is still pending when
    /// the timeout elapses it is force-resolved with `fallback`.
    pub fn sync_wait_or(&self, timeout: Duration, fallback: Outcome<T>) -> &Self {
        if !self.sync_wait_timeout(timeout) {
            self.resolve(fallback);
        }
        self
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<Continuation<T>>> {
        // Continuation panics are caught before they can poison the lock.
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reference to the stored outcome. Callers must have observed RESOLVED.
    fn outcome_ref(&self) -> &Outcome<T> {
        debug_assert_eq!(self.shared.state.load(Ordering::Acquire), RESOLVED);
        // Safety: outcome is written once before RESOLVED is published and
        // never mutated afterwards.
        unsafe {
            (*self.shared.outcome.get())
                .as_ref()
                .expect("resolved promise holds an outcome")
        }
    }
}

fn run_continuation<T>(continuation: Continuation<T>, outcome: &Outcome<T>) {
    if catch_unwind(AssertUnwindSafe(|| continuation(outcome))).is_err() {
        tracing::error!("promise continuation panicked; outcome delivery continues");
    }
}
