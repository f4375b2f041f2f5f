//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use memo_flow::{MemoError, Resolution};
use parking_lot::Mutex;

type Sender<T> = oneshot::Sender<Result<T, MemoError>>;

/// Hands out futures that settle only when the test says so.
///
/// The n-th call of [`Deferred::next`] is invocation `n`.
pub struct Deferred<T> {
    senders: Arc<Mutex<Vec<Option<Sender<T>>>>>,
    calls: Arc<AtomicUsize>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A future for the next invocation.
    pub fn next(&self) -> Resolution<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.senders.lock().push(Some(tx));
        Resolution::future(async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(canceled) => Err(canceled.into()),
            }
        })
    }

    pub fn resolve(&self, invocation: usize, value: T) {
        self.send(invocation, Ok(value));
    }

    pub fn reject(&self, invocation: usize, message: &'static str) {
        self.send(invocation, Err(MemoError::msg(message)));
    }

    fn send(&self, invocation: usize, outcome: Result<T, MemoError>) {
        let sender = self.senders.lock()[invocation - 1].take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }

    /// Number of futures handed out so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
