//! Serialized access to the single outgoing channel.
//!
//! Senders that find the transport full park on a FIFO wait list. Wakes are
//! exclusive: exactly one parked sender is flagged and retries, and after a
//! successful send it passes the wake on to the next one, since more buffer
//! space may be free.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use npulink_transport::{Transport, TransportError};
use parking_lot::{Condvar, MutexGuard};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

#[derive(Debug)]
struct Waiter {
    token: u64,
    woken: bool,
}

/// Wait list and closing/interrupt state of the channel.
///
/// Lives inside the device state and is only touched with the device lock
/// held.
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    waiters: VecDeque<Waiter>,
    next_token: u64,
    closing: bool,
    interrupt_epoch: u64,
}

impl SendQueue {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    /// Refuse all further sends. Parked senders fail with `Closed`.
    pub(crate) fn close(&mut self) {
        self.closing = true;
    }

    /// Make every sender parked right now fail with `Interrupted`.
    pub(crate) fn interrupt(&mut self) {
        self.interrupt_epoch = self.interrupt_epoch.wrapping_add(1);
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Flag the first parked sender that is not already flagged.
    ///
    /// Returns true if a sender was flagged; the caller must notify the
    /// condition variable.
    pub(crate) fn wake_one(&mut self) -> bool {
        match self.waiters.iter_mut().find(|w| !w.woken) {
            Some(waiter) => {
                waiter.woken = true;
                true
            }
            None => false,
        }
    }

    fn enqueue(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.waiters.push_back(Waiter {
            token,
            woken: false,
        });
        token
    }

    fn position(&self, token: u64) -> Option<usize> {
        self.waiters.iter().position(|w| w.token == token)
    }

    fn take_wake(&mut self, token: u64) -> bool {
        match self.position(token) {
            Some(index) if self.waiters[index].woken => {
                self.waiters[index].woken = false;
                true
            }
            _ => false,
        }
    }

    /// Leave the wait list. A pending wake is handed on so it is not lost.
    fn leave(&mut self, token: u64) -> bool {
        let Some(index) = self.position(token) else {
            return false;
        };
        let had_wake = self.waiters.remove(index).is_some_and(|w| w.woken);
        had_wake && self.wake_one()
    }
}

/// State that embeds a [`SendQueue`].
pub(crate) trait HasSendQueue {
    fn send_queue(&mut self) -> &mut SendQueue;
}

impl HasSendQueue for SendQueue {
    fn send_queue(&mut self) -> &mut SendQueue {
        self
    }
}

/// Send `message`, waiting for buffer space if the transport is full.
///
/// Must be called with the device lock held through `guard`. The lock is
/// released while parked and is held again when this returns.
pub(crate) fn send_blocking<S: HasSendQueue>(
    guard: &mut MutexGuard<'_, S>,
    cv: &Condvar,
    transport: &dyn Transport,
    message: &[u8],
    timeout: Duration,
) -> Result<()> {
    let epoch = {
        let q = guard.send_queue();
        if q.closing {
            return Err(EngineError::Closed);
        }
        q.interrupt_epoch
    };

    // Only try straight away when nobody is parked, so a newcomer cannot
    // overtake the wait list.
    if guard.send_queue().waiters.is_empty() {
        match transport.try_send(message) {
            Ok(()) => return Ok(()),
            Err(TransportError::WouldBlock) => {}
            Err(e) => return Err(e.into()),
        }
    }

    // No deadline when the timeout does not fit an `Instant`.
    let deadline = Instant::now().checked_add(timeout);
    let token = guard.send_queue().enqueue();
    debug!(len = message.len(), "transport full; waiting for space");

    loop {
        let q = guard.send_queue();
        if q.closing {
            if q.leave(token) {
                cv.notify_all();
            }
            return Err(EngineError::Closed);
        }
        if q.interrupt_epoch != epoch {
            if q.leave(token) {
                cv.notify_all();
            }
            return Err(EngineError::Interrupted);
        }

        if q.take_wake(token) {
            match transport.try_send(message) {
                Ok(()) => {
                    let q = guard.send_queue();
                    q.leave(token);
                    if q.wake_one() {
                        cv.notify_all();
                    }
                    return Ok(());
                }
                Err(TransportError::WouldBlock) => {}
                Err(e) => {
                    let q = guard.send_queue();
                    q.leave(token);
                    if q.wake_one() {
                        cv.notify_all();
                    }
                    return Err(e.into());
                }
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            if guard.send_queue().leave(token) {
                cv.notify_all();
            }
            warn!(?timeout, "send timed out waiting for transport space");
            return Err(EngineError::SendTimeout(timeout));
        }
        match deadline {
            Some(deadline) => {
                cv.wait_until(guard, deadline);
            }
            None => cv.wait(guard),
        }
    }
}
