//! Single-assignment result slot shared between a worker (producer) and callers.
//!
//! The [`Promise`] half lives inside a queued operation; the [`QueryFuture`] half is handed
//! to the caller before the operation is queued. Blocking waits use a condvar so worker
//! threads and game-loop threads need no runtime; callers that do live on tokio can await
//! [`QueryFuture::ready`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
    /// The promise was dropped without producing a value.
    Broken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn wake(&self) {
        self.ready.notify_all();
        self.notify.notify_waiters();
    }
}

/// Outcome of waiting on a [`QueryFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// A value is available (or was already taken by another consumer).
    Ready,
    /// Still pending when the wait gave up.
    Timeout,
    /// No value will ever arrive.
    Broken,
}

/// Producer half. Setting is single-shot; dropping it unset breaks the future.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half. Cheap to clone; every clone observes the same slot.
pub struct QueryFuture<T> {
    shared: Arc<Shared<T>>,
}

/// Create a linked promise/future pair.
#[must_use]
pub fn promise<T>() -> (Promise<T>, QueryFuture<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
        notify: Notify::new(),
    });
    (
        Promise {
            shared: Arc::clone(&shared),
        },
        QueryFuture { shared },
    )
}

impl<T> Promise<T> {
    /// Store `value` unless a value was already stored. Returns whether this call set it.
    pub fn try_set_result(&self, value: T) -> bool {
        let mut slot = self.shared.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(value);
        drop(slot);
        self.shared.wake();
        true
    }

    #[must_use]
    pub fn future(&self) -> QueryFuture<T> {
        QueryFuture {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Broken;
            drop(slot);
            self.shared.wake();
        }
    }
}

impl<T> Clone for QueryFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueryFuture<T> {
    /// A future that is ready from the start.
    #[must_use]
    pub fn ready_with(value: T) -> Self {
        let (promise, future) = promise();
        promise.try_set_result(value);
        future
    }

    /// `false` once it is known no value will ever be taken from this future: the producer
    /// went away, or the value has already been taken.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(*self.shared.lock(), Slot::Pending | Slot::Ready(_))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.lock(), Slot::Ready(_))
    }

    /// Block until the value arrives or the promise is dropped.
    pub fn wait(&self) -> FutureStatus {
        let mut slot = self.shared.lock();
        loop {
            if let Some(status) = settled(&slot) {
                return status;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`. `Duration::ZERO` polls without blocking.
    pub fn wait_for(&self, timeout: Duration) -> FutureStatus {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut slot = self.shared.lock();
        loop {
            if let Some(status) = settled(&slot) {
                return status;
            }
            let now = Instant::now();
            if now >= deadline {
                return FutureStatus::Timeout;
            }
            slot = self
                .shared
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
    }

    /// Move the value out if it is ready. Later calls, from any clone, return `None`.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.shared.lock();
        if !matches!(*slot, Slot::Ready(_)) {
            return None;
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Block until settled, then take the value.
    pub fn get(&self) -> Option<T> {
        self.wait();
        self.take()
    }

    /// Await the value from async code without blocking the runtime thread.
    pub async fn ready(&self) -> FutureStatus {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let status = settled(&self.shared.lock());
            if let Some(status) = status {
                return status;
            }
            notified.await;
        }
    }
}

fn settled<T>(slot: &Slot<T>) -> Option<FutureStatus> {
    match slot {
        Slot::Pending => None,
        Slot::Ready(_) | Slot::Taken => Some(FutureStatus::Ready),
        Slot::Broken => Some(FutureStatus::Broken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn value_can_be_set_only_once() {
        let (promise, future) = promise::<u32>();
        assert!(promise.try_set_result(1));
        assert!(!promise.try_set_result(2));
        assert_eq!(future.take(), Some(1));
        assert_eq!(future.take(), None);
        assert!(!future.is_valid());
    }

    #[test]
    fn zero_wait_polls_without_blocking() {
        let (promise, future) = promise::<&'static str>();
        assert_eq!(future.wait_for(Duration::ZERO), FutureStatus::Timeout);
        assert!(future.is_valid());
        promise.try_set_result("done");
        assert_eq!(future.wait_for(Duration::ZERO), FutureStatus::Ready);
    }

    #[test]
    fn dropped_promise_breaks_future() {
        let (promise, future) = promise::<u32>();
        let waiter = {
            let future = future.clone();
            thread::spawn(move || future.wait())
        };
        drop(promise);
        assert_eq!(waiter.join().unwrap(), FutureStatus::Broken);
        assert!(!future.is_valid());
        assert_eq!(future.take(), None);
    }

    #[test]
    fn blocking_wait_sees_value_from_other_thread() {
        let (promise, future) = promise::<Vec<u8>>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.try_set_result(vec![1, 2, 3])
        });
        assert_eq!(future.get(), Some(vec![1, 2, 3]));
        assert!(producer.join().unwrap());
    }

    #[test]
    fn async_ready_resolves_on_tokio() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (promise, future) = promise::<u64>();
        rt.block_on(async move {
            let producer = tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(10));
                promise.try_set_result(42);
            });
            assert_eq!(future.ready().await, FutureStatus::Ready);
            assert_eq!(future.take(), Some(42));
            producer.await.unwrap();
        });
    }
}
