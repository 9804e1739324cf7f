use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};

/// Multi-producer, multi-consumer queue of pending work with a broadcast shutdown.
///
/// `push` never blocks. `wait_and_pop` blocks until an item arrives or the queue is
/// cancelled; cancellation drops the sender of a signal channel, which wakes every blocked
/// consumer at once.
pub struct ProducerConsumerQueue<T> {
    items_tx: Sender<T>,
    items_rx: Receiver<T>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    cancelled: AtomicBool,
}

impl<T> Default for ProducerConsumerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProducerConsumerQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        let (items_tx, items_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        Self {
            items_tx,
            items_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Enqueue `item`. Returns it back if the queue has been cancelled.
    ///
    /// # Errors
    /// Hands `item` back when the queue no longer accepts work.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.is_cancelled() {
            return Err(item);
        }
        self.items_tx.send(item).map_err(|err| err.into_inner())
    }

    /// Block until an item is available. `None` means the queue was cancelled.
    pub fn wait_and_pop(&self) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        crossbeam_channel::select! {
            recv(self.items_rx) -> item => {
                // Lost the race with cancel(): drop the item rather than run it.
                if self.is_cancelled() {
                    None
                } else {
                    item.ok()
                }
            }
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Non-blocking pop, for draining.
    pub fn try_pop(&self) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        self.items_rx.try_recv().ok()
    }

    /// Stop the queue and wake every blocked consumer. Idempotent and irreversible.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(sender);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items_rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items_rx.is_empty()
    }

    /// Remove and return everything still queued. Used after cancel so pending work is
    /// dropped deterministically.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.items_rx.try_iter().collect()
    }
}
