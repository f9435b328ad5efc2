//! Single-fire completion signal carrying a result.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Create a connected completer/completion pair.
pub(crate) fn oneshot<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (Completer { tx: Some(tx) }, Completion { rx })
}

/// Producer half. Fires at most once.
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: Option<Sender<T>>,
}

impl<T> Completer<T> {
    /// Deliver `value`. Returns false if already completed.
    pub(crate) fn complete(&mut self, value: T) -> bool {
        match self.tx.take() {
            // The waiter may have given up; the value is simply dropped.
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Outcome of waiting on a [`Completion`].
#[derive(Debug)]
pub(crate) enum Waited<T> {
    Done(T),
    TimedOut,
    /// The completer was dropped without firing.
    Abandoned,
}

/// Consumer half.
#[derive(Debug)]
pub(crate) struct Completion<T> {
    rx: Receiver<T>,
}

impl<T> Completion<T> {
    pub(crate) fn wait(&self, timeout: Duration) -> Waited<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Waited::Done(value),
            Err(RecvTimeoutError::Timeout) => Waited::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Waited::Abandoned,
        }
    }
}
