//! Exactly-once completion for asynchronous requests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::Error;

type Callback<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;

/// Owns a request's completion handler.
///
/// The handler fires exactly once: with the result via [`Completer::complete`],
/// or with [`Error::Abandoned`] if the completer is dropped first.
pub struct Completer<T> {
    callback: Option<Callback<T>>,
}

impl<T> Completer<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn complete(mut self, result: Result<T, Error>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(Error::Abandoned));
        }
    }
}

struct State<T> {
    result: Option<Result<T, Error>>,
    waker: Option<Waker>,
    delivered: bool,
}

struct Slot<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fill(&self, result: Result<T, Error>) {
        let waker = {
            let mut state = self.lock();
            state.result = Some(result);
            state.delivered = true;
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Handle to the eventual result of an asynchronous request.
///
/// Await it as a [`Future`], block on it with [`Pending::wait`], or poll it
/// without blocking using [`Pending::try_take`].
pub struct Pending<T> {
    slot: Arc<Slot<T>>,
}

/// Creates a connected completer/handle pair.
pub fn channel<T: Send + 'static>() -> (Completer<T>, Pending<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(State {
            result: None,
            waker: None,
            delivered: false,
        }),
        ready: Condvar::new(),
    });
    let filler = Arc::clone(&slot);
    let completer = Completer::new(move |result| filler.fill(result));
    (completer, Pending { slot })
}

impl<T> Pending<T> {
    /// True once the result has been delivered (even if already taken).
    pub fn is_ready(&self) -> bool {
        self.slot.lock().delivered
    }

    /// Takes the result if it has arrived.
    pub fn try_take(&self) -> Option<Result<T, Error>> {
        self.slot.lock().result.take()
    }

    /// Blocks the current thread until the result arrives.
    pub fn wait(self) -> Result<T, Error> {
        let mut state = self.slot.lock();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            if state.delivered {
                return Err(Error::Abandoned);
            }
            state = self
                .slot
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`. `None` if the result has not arrived;
    /// `Abandoned` if it arrived but was already taken.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.lock();
        loop {
            if let Some(result) = state.result.take() {
                return Some(result);
            }
            if state.delivered {
                return Some(Err(Error::Abandoned));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .slot
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.lock();
        if let Some(result) = state.result.take() {
            return Poll::Ready(result);
        }
        if state.delivered {
            // already taken through try_take/wait_timeout
            return Poll::Ready(Err(Error::Abandoned));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
