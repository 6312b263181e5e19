//! Interactive-thread invocation queue.
//!
//! The editing pipeline never touches reader-visible state directly.
//! Instead it posts invocations (completed-store publications, delegate
//! notifications, completion callbacks) to an [`InvocationQueue`] that
//! the interactive thread pumps. The host's event loop integration calls
//! the coordinator's pump at its convenience; drains pump explicitly.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use parking_lot::{Condvar, Mutex};

/// A type-erased deferred invocation.
pub(crate) struct Invocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl Invocation {
    pub(crate) fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    pub(crate) fn execute(self) {
        (self.invoke)();
    }
}

/// An unbounded queue of invocations destined for the interactive thread.
///
/// Posting is legal from any thread; pumping is legal only from the
/// interactive thread (enforced by the coordinator's affinity check, not
/// here).
#[derive(Clone)]
pub(crate) struct InvocationQueue {
    sender: Sender<Invocation>,
    receiver: Receiver<Invocation>,
}

impl InvocationQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Post an invocation for later execution on the interactive thread.
    pub(crate) fn post<F>(&self, invoke: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The receiver half lives as long as the queue; send cannot fail.
        let _ = self.sender.send(Invocation::new(invoke));
    }

    /// Execute every pending invocation, in posting order.
    ///
    /// Returns the number of invocations executed. Invocations posted
    /// while pumping are executed in the same pass.
    pub(crate) fn pump(&self) -> usize {
        let mut executed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(invocation) => {
                    invocation.execute();
                    executed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        executed
    }

}

/// A handle for signaling completion of a deferred operation.
pub(crate) struct CompletionHandle {
    inner: Arc<CompletionState>,
}

impl CompletionHandle {
    /// Signal that the operation is complete.
    pub(crate) fn signal_done(self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.condvar.notify_all();
    }
}

/// A waiter that blocks until the paired handle signals.
pub(crate) struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Block the current thread until the operation completes.
    pub(crate) fn wait(self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.condvar.wait(&mut done);
        }
    }
}

struct CompletionState {
    done: Mutex<bool>,
    condvar: Condvar,
}

/// Create a completion handle/waiter pair.
pub(crate) fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        done: Mutex::new(false),
        condvar: Condvar::new(),
    });
    (
        CompletionHandle {
            inner: state.clone(),
        },
        CompletionWaiter { inner: state },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pump_executes_in_posting_order() {
        let queue = InvocationQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = order.clone();
            queue.post(move || order.lock().push(i));
        }

        assert_eq!(queue.pump(), 4);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pump(), 0);
    }

    #[test]
    fn test_cross_thread_post() {
        let queue = InvocationQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let posting = queue.clone();
        let posted = counter.clone();
        std::thread::spawn(move || {
            posting.post(move || {
                posted.fetch_add(1, Ordering::SeqCst);
            });
        })
        .join()
        .unwrap();

        queue.pump();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_pair() {
        let (handle, waiter) = completion_pair();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            handle.signal_done();
        });
        waiter.wait();
        thread.join().unwrap();
    }
}
