//! Session event queue
//!
//! All worker threads feed a single MPSC queue; the session control loop is
//! the only consumer, so every mutation of the gap tracker happens on one
//! thread. Shutdown intent is carried by an atomic flag next to the channel
//! so producers and the accept loop can observe it without draining events.

use cd11_protocol::Frame;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Events handled by the session control loop
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded frame arrived from the provider
    NewFrameReceived(Frame),
    /// Time to send an acknack
    SendAcknack,
    /// No provider contact within the configured limit
    ConnectionExpired,
    /// Time to persist the gap state
    PersistGapState,
    /// Time to sweep gaps past the configured age
    RemoveExpiredGaps,
    /// Stop the session
    Shutdown,
}

/// Receiving side of the session event queue
pub struct EventQueue {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    shutdown_pending: Arc<AtomicBool>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        EventQueue {
            tx,
            rx,
            shutdown_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable producer handle for worker threads
    pub fn producer(&self) -> EventProducer {
        EventProducer {
            tx: self.tx.clone(),
            shutdown_pending: self.shutdown_pending.clone(),
        }
    }

    /// Receive the next event, waiting at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Whether a shutdown event has been published
    pub fn shutdown_pending(&self) -> bool {
        self.shutdown_pending.load(Ordering::SeqCst)
    }
}

/// Sending side of the session event queue
#[derive(Clone)]
pub struct EventProducer {
    tx: Sender<Event>,
    shutdown_pending: Arc<AtomicBool>,
}

impl EventProducer {
    /// Publish an event; returns false once the queue is gone
    ///
    /// `Shutdown` and `ConnectionExpired` both end the session, so either one
    /// raises the pending flag. The expiry monitor exits right after
    /// publishing; without the flag its exit would look like an unexpected
    /// worker death to the control loop's health check.
    pub fn publish(&self, event: Event) -> bool {
        if matches!(event, Event::Shutdown | Event::ConnectionExpired) {
            self.shutdown_pending.store(true, Ordering::SeqCst);
        }
        self.tx.send(event).is_ok()
    }

    /// Publish a shutdown event and raise the pending flag
    pub fn signal_shutdown(&self) {
        self.publish(Event::Shutdown);
    }

    /// Whether a shutdown event has been published
    pub fn shutdown_pending(&self) -> bool {
        self.shutdown_pending.load(Ordering::SeqCst)
    }
}
