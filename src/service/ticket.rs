//! # Tickets
//!
//! Correlation records for outstanding calls, recycled through a bounded pool.
//!
//! A ticket is armed with a fresh request serial, registered as pending,
//! and completed by the read loop when the matching Reply arrives. Waiters
//! can block a thread (condition variable) or await a task (notify). A
//! [`TicketGuard`] removes the ticket from the pending map and returns it to
//! the pool when dropped, whatever the outcome, including cancellation of
//! the awaiting future.
//!
//! Completion is keyed by serial, so a recycled ticket can never be completed
//! by a late reply addressed to its previous use.

use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// First request serial; lower values are left to the channel.
pub const FIRST_SERIAL: i32 = 101;

static NEXT_SERIAL: AtomicI32 = AtomicI32::new(FIRST_SERIAL);

/// Next process-wide request serial, wrapping back to [`FIRST_SERIAL`].
pub fn next_serial() -> i32 {
    let previous = NEXT_SERIAL.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(if current == i32::MAX {
            FIRST_SERIAL
        } else {
            current + 1
        })
    });
    // the closure never declines, so both arms carry the previous value
    match previous {
        Ok(serial) | Err(serial) => serial,
    }
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    /// Success reply payload.
    Reply(Bytes),
    /// Failure reply text.
    Failed(String),
    /// The channel closed or lost its stream.
    Closed,
    /// The call could not be sent.
    Aborted(String),
}

impl TicketOutcome {
    pub fn into_result(self) -> Result<Bytes> {
        match self {
            TicketOutcome::Reply(payload) => Ok(payload),
            TicketOutcome::Failed(text) => Err(ProtocolError::RemoteCall(text)),
            TicketOutcome::Closed => Err(ProtocolError::ConnectionClosed),
            TicketOutcome::Aborted(reason) => Err(ProtocolError::TransportError(reason)),
        }
    }
}

#[derive(Debug, Default)]
struct TicketState {
    serial: i32,
    outcome: Option<TicketOutcome>,
}

/// One recyclable correlation record.
#[derive(Debug, Default)]
pub struct Ticket {
    state: Mutex<TicketState>,
    ready: Condvar,
    notify: Notify,
}

impl Ticket {
    fn lock(&self) -> MutexGuard<'_, TicketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, serial: i32) {
        let mut state = self.lock();
        state.serial = serial;
        state.outcome = None;
    }

    /// Record `outcome` if the ticket is still armed for `serial`.
    pub fn complete(&self, serial: i32, outcome: TicketOutcome) -> bool {
        {
            let mut state = self.lock();
            if state.serial != serial || state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
        }
        self.ready.notify_all();
        self.notify.notify_one();
        true
    }

    fn take(&self) -> Option<TicketOutcome> {
        self.lock().outcome.take()
    }

    /// Block the current thread until completion or `timeout`.
    pub fn wait_blocking(&self, timeout: Duration) -> Option<TicketOutcome> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.outcome.take()
    }

    /// Wait for completion without blocking the runtime.
    pub async fn wait(&self) -> TicketOutcome {
        loop {
            if let Some(outcome) = self.take() {
                return outcome;
            }
            // a permit stored by notify_one covers completion between take and await
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    pending: HashMap<i32, Arc<Ticket>>,
    pool: Vec<Arc<Ticket>>,
}

/// Pending-request map plus the idle ticket pool, behind one lock.
#[derive(Debug)]
pub struct TicketBook {
    book: Mutex<Book>,
    pool_limit: usize,
}

impl TicketBook {
    pub fn new(pool_limit: usize) -> Self {
        Self {
            book: Mutex::new(Book::default()),
            pool_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a ticket from the pool (or allocate one), arm it with the next
    /// serial and register it as pending.
    pub fn checkout(&self) -> Result<TicketGuard<'_>> {
        let serial = next_serial();
        let ticket = {
            let mut book = self.lock();
            if book.pending.contains_key(&serial) {
                // a full wrap of the serial space with a call still pending
                return Err(ProtocolError::Custom(format!(
                    "request serial {serial} already pending"
                )));
            }
            let ticket = book.pool.pop().unwrap_or_default();
            ticket.arm(serial);
            book.pending.insert(serial, Arc::clone(&ticket));
            ticket
        };
        trace!(request_id = serial, "Ticket checked out");
        Ok(TicketGuard {
            book: self,
            serial,
            ticket,
        })
    }

    /// Deliver `outcome` to the pending call with `serial`.
    ///
    /// Returns `false` when no such call is pending.
    pub fn complete(&self, serial: i32, outcome: TicketOutcome) -> bool {
        let ticket = self.lock().pending.get(&serial).cloned();
        match ticket {
            Some(ticket) => ticket.complete(serial, outcome),
            None => false,
        }
    }

    /// Fail every pending call with [`TicketOutcome::Closed`].
    pub fn fail_all(&self) -> usize {
        let pending: Vec<(i32, Arc<Ticket>)> = self
            .lock()
            .pending
            .iter()
            .map(|(serial, ticket)| (*serial, Arc::clone(ticket)))
            .collect();
        pending
            .into_iter()
            .filter(|(serial, ticket)| ticket.complete(*serial, TicketOutcome::Closed))
            .count()
    }

    fn release(&self, serial: i32, ticket: &Arc<Ticket>) {
        let mut book = self.lock();
        if let Some(current) = book.pending.get(&serial) {
            if Arc::ptr_eq(current, ticket) {
                book.pending.remove(&serial);
            }
        }
        if book.pool.len() < self.pool_limit {
            ticket.arm(0);
            book.pool.push(Arc::clone(ticket));
        }
    }

    /// Drop every idle ticket.
    pub fn drain_pool(&self) {
        self.lock().pool.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn pool_len(&self) -> usize {
        self.lock().pool.len()
    }

    pub fn pool_limit(&self) -> usize {
        self.pool_limit
    }
}

/// Checked-out ticket; dropping it releases the ticket.
#[derive(Debug)]
pub struct TicketGuard<'a> {
    book: &'a TicketBook,
    serial: i32,
    ticket: Arc<Ticket>,
}

impl TicketGuard<'_> {
    pub fn serial(&self) -> i32 {
        self.serial
    }

    pub fn ticket(&self) -> &Arc<Ticket> {
        &self.ticket
    }

    /// Await the outcome for at most `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, self.ticket.wait()).await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Block for the outcome for at most `timeout`.
    pub fn wait_blocking(&self, timeout: Duration) -> Result<Bytes> {
        match self.ticket.wait_blocking(timeout) {
            Some(outcome) => outcome.into_result(),
            None => Err(ProtocolError::Timeout),
        }
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.book.release(self.serial, &self.ticket);
        trace!(request_id = self.serial, "Ticket released");
    }
}

/// Error for calls attempted on a channel that is closed.
pub(crate) fn closed() -> ProtocolError {
    ProtocolError::TransportError(constants::ERR_CHANNEL_CLOSED.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_unique_and_start_high() {
        let a = next_serial();
        let b = next_serial();
        assert!(a >= FIRST_SERIAL);
        assert_ne!(a, b);
    }

    #[test]
    fn test_complete_and_release() {
        let book = TicketBook::new(4);
        let guard = book.checkout().unwrap();
        let serial = guard.serial();
        assert_eq!(book.pending_len(), 1);

        assert!(book.complete(serial, TicketOutcome::Reply(Bytes::from_static(b"ok"))));
        // second completion for the same serial is ignored
        assert!(!book.complete(serial, TicketOutcome::Closed));
        assert_eq!(
            guard.wait_blocking(Duration::from_millis(10)).unwrap(),
            Bytes::from_static(b"ok")
        );

        drop(guard);
        assert_eq!(book.pending_len(), 0);
        assert_eq!(book.pool_len(), 1);
        assert!(!book.complete(serial, TicketOutcome::Closed));
    }

    #[test]
    fn test_recycled_ticket_ignores_stale_serial() {
        let book = TicketBook::new(4);
        let first = book.checkout().unwrap();
        let stale = first.serial();
        let ticket = Arc::clone(first.ticket());
        drop(first);

        let second = book.checkout().unwrap();
        assert!(Arc::ptr_eq(&ticket, second.ticket()));
        assert!(!ticket.complete(stale, TicketOutcome::Closed));
        assert!(ticket.complete(second.serial(), TicketOutcome::Failed("no".into())));
        assert!(matches!(
            second.wait_blocking(Duration::from_millis(10)),
            Err(ProtocolError::RemoteCall(t)) if t == "no"
        ));
    }

    #[test]
    fn test_pool_is_bounded() {
        let book = TicketBook::new(1);
        let a = book.checkout().unwrap();
        let b = book.checkout().unwrap();
        drop(a);
        drop(b);
        assert_eq!(book.pool_len(), 1);
        book.drain_pool();
        assert_eq!(book.pool_len(), 0);
    }

    #[test]
    fn test_blocking_timeout() {
        let book = TicketBook::new(2);
        let guard = book.checkout().unwrap();
        assert!(matches!(
            guard.wait_blocking(Duration::from_millis(5)),
            Err(ProtocolError::Timeout)
        ));
        drop(guard);
        assert_eq!(book.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_async_wait_and_fail_all() {
        let book = Arc::new(TicketBook::new(2));
        let guard = book.checkout().unwrap();
        assert_eq!(book.fail_all(), 1);
        assert!(matches!(
            guard.wait(Duration::from_secs(1)).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
