//! Session worker threads
//!
//! Each concern of the running session gets its own named thread: frame
//! reception, acknack timing, connection expiry, gap persistence and gap
//! expiry. Workers never touch the gap tracker; they publish events and the
//! control loop does the mutation.

use crate::event::{Event, EventProducer};
use crate::transport::FrameTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Granularity at which sleeping workers re-check their stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A worker thread failure, carried back through `join`
#[derive(Debug, Error)]
#[error("{0}")]
pub struct WorkerError(pub String);

/// Tracks the time of last provider contact
pub struct ContactClock {
    last_contact: Mutex<Instant>,
}

impl Default for ContactClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactClock {
    pub fn new() -> Self {
        ContactClock {
            last_contact: Mutex::new(Instant::now()),
        }
    }

    /// Record provider contact now
    pub fn touch(&self) {
        *self.last_contact.lock() = Instant::now();
    }

    /// Time since the last provider contact
    pub fn idle(&self) -> Duration {
        self.last_contact.lock().elapsed()
    }
}

/// A named session worker thread
pub struct Worker {
    name: &'static str,
    handle: JoinHandle<Result<(), WorkerError>>,
}

impl Worker {
    /// Spawn a named worker running `body` to completion
    pub fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Worker>
    where
        F: FnOnce() -> Result<(), WorkerError> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = body();
                debug!(worker = name, ok = result.is_ok(), "worker finished");
                result
            })?;
        Ok(Worker { name, handle })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the thread has exited, for control-loop health checks
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread; `Some` carries the failure message, panics included
    pub fn join(self) -> Option<String> {
        match self.handle.join() {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("worker panicked".to_string()),
        }
    }
}

/// Sleep for `duration`, waking early if `stop` is raised; false when stopped
fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(STOP_POLL_INTERVAL));
    }
}

/// Publish `event` every `interval` until stopped or the queue is gone
pub fn run_interval_timer(
    stop: Arc<AtomicBool>,
    interval: Duration,
    events: EventProducer,
    event: Event,
) -> Result<(), WorkerError> {
    while sleep_unless_stopped(&stop, interval) {
        if !events.publish(event.clone()) {
            break;
        }
    }
    Ok(())
}

/// Read frames until stopped, touching the contact clock on each arrival
///
/// A read failure while the stop flag is down is a real link failure and is
/// reported; a failure after the flag is up is the session unblocking us.
pub fn run_frame_receiver(
    stop: Arc<AtomicBool>,
    transport: Arc<dyn FrameTransport>,
    contact: Arc<ContactClock>,
    events: EventProducer,
) -> Result<(), WorkerError> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        match transport.read() {
            Ok(frame) => {
                contact.touch();
                if !events.publish(Event::NewFrameReceived(frame)) {
                    return Ok(());
                }
            }
            Err(_) if stop.load(Ordering::SeqCst) => return Ok(()),
            Err(err) => return Err(WorkerError(format!("frame read failed: {err}"))),
        }
    }
}

/// Publish `ConnectionExpired` once the provider has been silent for `limit`
///
/// Sleeps only as long as the current contact allows, then re-evaluates, so
/// contact during the wait pushes the deadline out.
pub fn run_expiry_monitor(
    stop: Arc<AtomicBool>,
    limit: Duration,
    contact: Arc<ContactClock>,
    events: EventProducer,
) -> Result<(), WorkerError> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let idle = contact.idle();
        if idle >= limit {
            events.publish(Event::ConnectionExpired);
            return Ok(());
        }
        if !sleep_unless_stopped(&stop, limit - idle) {
            return Ok(());
        }
    }
}
