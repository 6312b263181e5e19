//! The serial editing transaction pipeline.
//!
//! [`EditPipeline`] runs a dedicated thread that exclusively owns the
//! authoritative editing store. Transactions are boxed closures executed
//! strictly FIFO, one at a time: the single-writer invariant every other
//! consistency guarantee in this crate rests on.
//!
//! There is no cancellation and no timeout: once a transaction is
//! submitted it runs to completion. Callers that need to observe a fully
//! applied state before proceeding use [`EditPipeline::drain`], which
//! blocks until every previously submitted transaction has executed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::dispatch::{CompletionHandle, completion_pair};
use crate::error::{TrellisError, TrellisResult};
use crate::store::ElementStore;

/// A transaction executed against the editing store.
type Transaction = Box<dyn FnOnce(&mut ElementStore) + Send>;

enum Message {
    /// Execute a transaction.
    Run(Transaction),
    /// Signal the paired waiter once every prior message has executed.
    Barrier(CompletionHandle),
    /// Stop after draining any messages already queued.
    Shutdown,
}

/// A single-worker FIFO execution context owning the editing store.
pub(crate) struct EditPipeline {
    sender: Sender<Message>,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl EditPipeline {
    /// Spawn the pipeline thread.
    pub(crate) fn new(name: &str) -> TrellisResult<Self> {
        let (sender, receiver) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));

        let thread_running = running.clone();
        let thread_pending = pending.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                pipeline_loop(receiver, thread_pending);
                thread_running.store(false, Ordering::Release);
            })
            .map_err(|e| TrellisError::PipelineSpawn(e.to_string()))?;

        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
            running,
            pending,
        })
    }

    /// Whether the pipeline thread is still accepting transactions.
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of transactions queued but not yet executed.
    pub(crate) fn pending_transactions(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Submit a transaction for FIFO execution.
    pub(crate) fn submit<F>(&self, transaction: F) -> TrellisResult<()>
    where
        F: FnOnce(&mut ElementStore) + Send + 'static,
    {
        if !self.is_running() {
            return Err(TrellisError::PipelineStopped);
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.sender
            .send(Message::Run(Box::new(transaction)))
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                TrellisError::PipelineStopped
            })
    }

    /// Block until every previously submitted transaction has executed.
    ///
    /// This is a barrier, not a spin: the calling thread sleeps on a
    /// condvar until the pipeline reaches the barrier message.
    pub(crate) fn drain(&self) {
        if !self.is_running() {
            return;
        }
        let (handle, waiter) = completion_pair();
        if self.sender.send(Message::Barrier(handle)).is_ok() {
            waiter.wait();
        }
    }

    /// Request shutdown after queued transactions finish.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.sender.send(Message::Shutdown);
    }

    /// Wait for the pipeline thread to exit.
    pub(crate) fn join(&self) {
        let mut handle = self.handle.lock();
        if let Some(h) = handle.take() {
            let _ = h.join();
        }
    }

    /// Stop the pipeline and wait for it to finish.
    pub(crate) fn stop_and_join(&self) {
        self.stop();
        self.join();
    }
}

impl Drop for EditPipeline {
    fn drop(&mut self) {
        // Request shutdown without blocking; the coordinator joins
        // explicitly when it owns the pipeline.
        self.stop();
    }
}

/// The pipeline loop. Owns the editing store for its whole lifetime.
fn pipeline_loop(receiver: Receiver<Message>, pending: Arc<AtomicUsize>) {
    let mut editing = ElementStore::new();
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(transaction) => {
                transaction(&mut editing);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Message::Barrier(handle) => handle.signal_done(),
            Message::Shutdown => {
                // Finish transactions that were queued before shutdown.
                while let Ok(message) = receiver.try_recv() {
                    match message {
                        Message::Run(transaction) => {
                            transaction(&mut editing);
                            pending.fetch_sub(1, Ordering::AcqRel);
                        }
                        Message::Barrier(handle) => handle.signal_done(),
                        Message::Shutdown => continue,
                    }
                }
                break;
            }
        }
    }
    tracing::debug!(target: "horizon_trellis", "editing pipeline stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexPath;
    use crate::store::Section;
    use std::sync::mpsc;

    #[test]
    fn test_fifo_execution_order() {
        let pipeline = EditPipeline::new("test-pipeline").unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..8 {
            let tx = tx.clone();
            pipeline
                .submit(move |_editing| {
                    tx.send(i).unwrap();
                })
                .unwrap();
        }
        pipeline.drain();

        let observed: Vec<i32> = rx.try_iter().collect();
        assert_eq!(observed, (0..8).collect::<Vec<_>>());
        pipeline.stop_and_join();
    }

    #[test]
    fn test_editing_store_persists_across_transactions() {
        let pipeline = EditPipeline::new("test-pipeline").unwrap();
        let (tx, rx) = mpsc::channel();

        pipeline
            .submit(|editing| {
                editing.insert_sections(vec![(0, Section::new())]);
            })
            .unwrap();
        pipeline
            .submit(move |editing| {
                tx.send(editing.section_count()).unwrap();
            })
            .unwrap();
        pipeline.drain();

        assert_eq!(rx.recv().unwrap(), 1);
        pipeline.stop_and_join();
    }

    #[test]
    fn test_drain_waits_for_prior_work() {
        let pipeline = EditPipeline::new("test-pipeline").unwrap();
        let (tx, rx) = mpsc::channel();

        pipeline
            .submit(move |editing| {
                std::thread::sleep(std::time::Duration::from_millis(30));
                editing.insert_sections(vec![(0, Section::new())]);
                tx.send(()).unwrap();
            })
            .unwrap();

        pipeline.drain();
        // The transaction must have completed before drain returned.
        rx.try_recv().expect("drain returned before transaction ran");
        assert_eq!(pipeline.pending_transactions(), 0);
        pipeline.stop_and_join();
    }

    #[test]
    fn test_submit_after_stop_fails() {
        let pipeline = EditPipeline::new("test-pipeline").unwrap();
        pipeline.stop_and_join();

        let result = pipeline.submit(|editing| {
            editing.insert_items(vec![(IndexPath::new(0, 0), crate::node::Node::new(Zero))]);
        });
        assert!(matches!(result, Err(TrellisError::PipelineStopped)));
    }

    struct Zero;

    impl crate::node::MeasureContent for Zero {
        fn measure(
            &self,
            _constraint: crate::geometry::SizeRange,
            _ctx: &crate::layout::LayoutContext,
        ) -> crate::geometry::Size {
            crate::geometry::Size::ZERO
        }
    }
}
