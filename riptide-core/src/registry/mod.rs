//! Correlation registry for in-flight operations.
//!
//! Holds the handler for every operation currently submitted to the kernel,
//! keyed by the integer token stamped into the submission slot's user-data
//! field. The kernel echoes the token back unchanged on the completion
//! ring, which is the only link between a completion and its submission.
//!
//! Tokens are slab indices: recycled through a free list, unique among
//! in-flight operations, and reused only after their handler has been
//! released.

/// Token correlating one submission with its completion.
pub type Token = u64;

/// Slab of in-flight handlers with index recycling.
pub struct CompletionRegistry<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    in_flight: usize,
}

impl<T> CompletionRegistry<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            in_flight: 0,
        }
    }

    /// Stores a handler and returns a fresh-or-recycled token for it.
    pub fn insert(&mut self, handler: T) -> Token {
        self.in_flight += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(handler);
                index as Token
            }
            None => {
                self.slots.push(Some(handler));
                (self.slots.len() - 1) as Token
            }
        }
    }

    /// Removes and returns the handler for `token`.
    ///
    /// Unknown, stale or duplicate tokens return `None`. This is tolerated
    /// rather than fatal: it guards against spurious or duplicated
    /// completions reported by the ring.
    pub fn release(&mut self, token: Token) -> Option<T> {
        let index = token as usize;
        let handler = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        self.in_flight -= 1;
        Some(handler)
    }

    /// Borrow the handler for `token` without releasing it.
    pub fn get(&self, token: Token) -> Option<&T> {
        self.slots.get(token as usize)?.as_ref()
    }

    /// Mutably borrow the handler for `token` without releasing it.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.slots.get_mut(token as usize)?.as_mut()
    }

    /// Number of handlers currently registered.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl<T> Default for CompletionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
