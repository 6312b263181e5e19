//! Thread affinity verification.
//!
//! The coordinator's reader and edit surfaces are only legal to call from
//! the interactive thread they were created on. Violations are fatal
//! assertions, active in release builds too, because a wrong-thread
//! call indicates a broken invariant that would corrupt subsequent state,
//! not a recoverable condition.

use std::thread::ThreadId;

/// Records the thread an object was created on and verifies that
/// subsequent operations occur on the same thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Create an affinity tracker for the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// The thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Assert that we are on the bound thread.
    ///
    /// Always active, in debug and release builds alike.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if called from a different thread.
    #[inline]
    pub fn assert_same_thread(&self, operation: &str) {
        if !self.is_same_thread() {
            self.panic_wrong_thread(operation);
        }
    }

    #[cold]
    #[inline(never)]
    fn panic_wrong_thread(&self, operation: &str) -> ! {
        let current = std::thread::current();
        panic!(
            "thread affinity violation: {operation} must be called from the \
             interactive thread (bound to {:?}, called from \"{}\" {:?}). \
             Mutation and reader APIs are single-threaded; deliver results \
             to the interactive thread instead of calling across.",
            self.thread_id,
            current.name().unwrap_or("<unnamed>"),
            current.id(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_thread_passes() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_same_thread());
        affinity.assert_same_thread("test operation");
    }

    #[test]
    fn test_cross_thread_detected() {
        let affinity = ThreadAffinity::current();
        let handle = std::thread::spawn(move || affinity.is_same_thread());
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_cross_thread_assert_panics() {
        let affinity = ThreadAffinity::current();
        let result = std::thread::spawn(move || {
            affinity.assert_same_thread("cross-thread call");
        })
        .join();
        assert!(result.is_err());
    }
}
