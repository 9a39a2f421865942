//! Connection session for one station
//!
//! Owns the listening socket, the provider connection, the worker threads and
//! the gap tracker. Every tracker mutation happens on the control-loop thread;
//! workers only publish events.

use crate::config::StationConfig;
use crate::event::{Event, EventQueue};
use crate::storage::{DataRecord, FrameStore, GapSnapshotStore, StorageError};
use crate::transport::{FrameTransport, TransportError};
use crate::worker::{
    run_expiry_monitor, run_frame_receiver, run_interval_timer, ContactClock, Worker,
};
use cd11_protocol::{DataFrame, Frame, SequenceGapTracker};
use chrono::Utc;
use crossbeam::channel::RecvTimeoutError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long the control loop waits for an event before re-checking workers.
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Linger applied to the provider connection so teardown flushes queued data.
const PROVIDER_LINGER: Duration = Duration::from_secs(3);

/// Session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("session is not listening")]
    NotListening,

    #[error("accepted connection has no TCP peer address")]
    NonTcpPeer,

    #[error("worker thread '{0}' exited unexpectedly")]
    WorkerDied(&'static str),

    #[error("session workers failed: {}", failures.join("; "))]
    WorkerFailures { failures: Vec<String> },
}

/// Lifecycle of a [`ConsumerSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the provider to connect
    Listening,
    /// Provider connected, workers not yet running
    Connected,
    /// Control loop processing events
    Running,
    /// Teardown in progress
    ShuttingDown,
    /// Session finished; terminal
    Closed,
}

/// Handle for stopping a session from another thread
#[derive(Clone)]
pub struct SessionHandle {
    events: crate::event::EventProducer,
}

impl SessionHandle {
    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        self.events.signal_shutdown();
    }
}

/// One CD-1.1 consumer session for one station
pub struct ConsumerSession {
    config: StationConfig,
    transport: Arc<dyn FrameTransport>,
    frame_store: Arc<dyn FrameStore>,
    snapshot_store: Arc<dyn GapSnapshotStore>,
    tracker: SequenceGapTracker,
    queue: EventQueue,
    stop: Arc<AtomicBool>,
    contact: Arc<ContactClock>,
    data_frames_received: Arc<AtomicU64>,
    listener: Option<Socket>,
    state: SessionState,
    /// Raised by a provider reset; the cleared state must not be re-persisted.
    suppress_persist: bool,
}

impl ConsumerSession {
    pub fn new(
        config: StationConfig,
        transport: Arc<dyn FrameTransport>,
        frame_store: Arc<dyn FrameStore>,
        snapshot_store: Arc<dyn GapSnapshotStore>,
    ) -> Self {
        ConsumerSession {
            config,
            transport,
            frame_store,
            snapshot_store,
            tracker: SequenceGapTracker::new(),
            queue: EventQueue::new(),
            stop: Arc::new(AtomicBool::new(false)),
            contact: Arc::new(ContactClock::new()),
            data_frames_received: Arc::new(AtomicU64::new(0)),
            listener: None,
            state: SessionState::Closed,
            suppress_persist: false,
        }
    }

    /// Handle for stopping this session from another thread
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.queue.producer(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Gap tracker state, for inspection after the session ends
    pub fn tracker(&self) -> &SequenceGapTracker {
        &self.tracker
    }

    /// Data frames received over the life of the session
    pub fn data_frames_received(&self) -> u64 {
        self.data_frames_received.load(Ordering::Relaxed)
    }

    /// Listen, accept one provider connection and run the session to completion
    pub fn run(&mut self) -> Result<(), SessionError> {
        let span = info_span!("session", station = %self.config.station_name);
        let _guard = span.enter();

        self.bind()?;
        match self.accept_provider()? {
            Some(stream) => {
                self.transport.connect(stream)?;
                self.state = SessionState::Connected;
                self.serve()
            }
            None => {
                info!("shutdown requested before the provider connected");
                self.state = SessionState::Closed;
                Ok(())
            }
        }
    }

    /// Run the session over an already-connected transport
    ///
    /// The listening and accept phases are skipped; everything else behaves
    /// as in [`run`](Self::run).
    pub fn run_connected(&mut self) -> Result<(), SessionError> {
        let span = info_span!("session", station = %self.config.station_name);
        let _guard = span.enter();

        self.state = SessionState::Connected;
        self.serve()
    }

    /// Bind the listening socket; returns the bound address
    pub fn bind(&mut self) -> Result<SocketAddr, SessionError> {
        let addr = self.config.listen;
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        socket.set_nonblocking(true)?;

        let local = socket
            .local_addr()?
            .as_socket()
            .ok_or(SessionError::NonTcpPeer)?;
        info!(listen = %local, "listening for provider connection");
        self.listener = Some(socket);
        self.state = SessionState::Listening;
        Ok(local)
    }

    /// Wait for the provider; `None` when shutdown was requested while waiting
    fn accept_provider(&mut self) -> Result<Option<TcpStream>, SessionError> {
        let listener = self.listener.take().ok_or(SessionError::NotListening)?;
        loop {
            if self.stop.load(Ordering::SeqCst) || self.queue.shutdown_pending() {
                return Ok(None);
            }
            match listener.accept() {
                Ok((socket, peer)) => {
                    let peer = peer.as_socket().ok_or(SessionError::NonTcpPeer)?;
                    if peer.ip() != self.config.expected_provider {
                        if self.config.reject_unexpected_provider {
                            error!(%peer, expected = %self.config.expected_provider,
                                "rejecting connection from unexpected address");
                            continue;
                        }
                        warn!(%peer, expected = %self.config.expected_provider,
                            "accepting connection from unexpected address");
                    }
                    socket.set_linger(Some(PROVIDER_LINGER))?;
                    socket.set_nonblocking(false)?;
                    info!(%peer, "provider connected");
                    return Ok(Some(socket.into()));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn serve(&mut self) -> Result<(), SessionError> {
        self.load_gap_state();
        self.contact.touch();

        let workers = self.spawn_workers()?;
        self.state = SessionState::Running;
        info!("session running");

        let loop_result = self.event_loop(&workers);
        let failures = self.shutdown_gracefully(workers);
        self.state = SessionState::Closed;

        if !failures.is_empty() {
            return Err(SessionError::WorkerFailures { failures });
        }
        loop_result
    }

    fn spawn_workers(&self) -> Result<Vec<Worker>, SessionError> {
        let mut workers = Vec::with_capacity(5);

        {
            let stop = self.stop.clone();
            let transport = self.transport.clone();
            let contact = self.contact.clone();
            let events = self.queue.producer();
            workers.push(Worker::spawn("frame-receiver", move || {
                run_frame_receiver(stop, transport, contact, events)
            })?);
        }
        {
            let stop = self.stop.clone();
            let interval = self.config.acknack_interval();
            let events = self.queue.producer();
            workers.push(Worker::spawn("acknack-timer", move || {
                run_interval_timer(stop, interval, events, Event::SendAcknack)
            })?);
        }
        {
            let stop = self.stop.clone();
            let limit = self.config.connection_expiry();
            let contact = self.contact.clone();
            let events = self.queue.producer();
            workers.push(Worker::spawn("connection-expiry", move || {
                run_expiry_monitor(stop, limit, contact, events)
            })?);
        }
        {
            let stop = self.stop.clone();
            let interval = self.config.gap_persist_interval();
            let events = self.queue.producer();
            workers.push(Worker::spawn("gap-persister", move || {
                run_interval_timer(stop, interval, events, Event::PersistGapState)
            })?);
        }
        // No sweeper when expiry is disabled.
        if self.config.gap_expiry_days > 0 {
            let stop = self.stop.clone();
            let interval = self.config.gap_sweep_interval();
            let events = self.queue.producer();
            workers.push(Worker::spawn("gap-expiry-sweeper", move || {
                run_interval_timer(stop, interval, events, Event::RemoveExpiredGaps)
            })?);
        }

        Ok(workers)
    }

    fn event_loop(&mut self, workers: &[Worker]) -> Result<(), SessionError> {
        loop {
            // A dead worker is fatal unless we are already tearing down.
            if !self.queue.shutdown_pending() {
                if let Some(dead) = workers.iter().find(|w| w.is_finished()) {
                    error!(worker = dead.name(), "worker exited unexpectedly");
                    return Err(SessionError::WorkerDied(dead.name()));
                }
            }

            let event = match self.queue.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            };

            match event {
                Event::NewFrameReceived(frame) => self.process_frame(frame),
                Event::SendAcknack => self.send_acknack(),
                Event::PersistGapState => self.persist_gap_state(),
                Event::RemoveExpiredGaps => {
                    if self.config.gap_expiry_days > 0 {
                        self.tracker.expire(self.config.gap_expiry_days);
                    }
                }
                Event::ConnectionExpired => {
                    warn!(
                        limit_secs = self.config.connection_expiry_secs,
                        "no provider contact within limit, shutting down"
                    );
                    return Ok(());
                }
                Event::Shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        debug!(kind = frame.kind(), "processing frame");
        match frame {
            Frame::Acknack(acknack) => {
                if let Err(err) = self.tracker.reconcile(&acknack) {
                    error!(%err, "dropping invalid acknack");
                }
            }
            Frame::Data(data) => self.handle_data_frame(data),
            Frame::CommandResponse { sequence_number } => {
                debug!(sequence_number, "recording command response");
                self.tracker.record_sequence_number(sequence_number, true);
            }
            Frame::Alert { message } => {
                info!(message, "provider sent alert, shutting down");
                self.queue.producer().signal_shutdown();
            }
            Frame::Reset => {
                info!("provider requested reset, clearing gap state and shutting down");
                self.suppress_persist = true;
                self.tracker = SequenceGapTracker::new();
                if let Err(err) = self.snapshot_store.clear(&self.config.station_name) {
                    error!(%err, "failed to clear persisted gap state");
                }
                self.queue.producer().signal_shutdown();
            }
            Frame::OptionRequest => {
                if let Err(err) = self
                    .transport
                    .send_option_response(&self.config.station_name)
                {
                    error!(%err, "failed to answer option request");
                }
            }
            Frame::OptionResponse => debug!("ignoring option response"),
            Frame::CommandRequest => {
                warn!("ignoring command request, which a provider should never send")
            }
            Frame::Unsupported { kind } => warn!(kind, "ignoring unsupported frame"),
        }
    }

    fn handle_data_frame(&mut self, data: DataFrame) {
        self.data_frames_received.fetch_add(1, Ordering::Relaxed);
        let record = DataRecord {
            station: self.config.station_name.clone(),
            sequence_number: data.sequence_number,
            reception_time: Utc::now(),
            payload: data.payload,
        };
        match self.frame_store.store(&record) {
            Ok(()) => {
                self.tracker
                    .record_sequence_number(data.sequence_number, true);
                debug!(sequence_number = data.sequence_number, "data frame stored");
            }
            Err(err) => {
                // Leaving the sequence number unrecorded keeps the frame in
                // the gap list, so the provider re-sends it.
                error!(sequence_number = data.sequence_number, %err,
                    "data frame not stored, sequence number left unrecorded");
            }
        }
    }

    fn send_acknack(&self) {
        let lowest = self.tracker.lowest_sequence_number();
        let highest = self.tracker.highest_sequence_number();
        let gap_ranges: Vec<u64> = self
            .tracker
            .reportable_gaps()
            .into_iter()
            .flat_map(|(start, end)| [start, end])
            .collect();

        match self.transport.send_acknack(
            &self.config.station_name,
            lowest,
            highest,
            &gap_ranges,
        ) {
            Ok(()) => debug!(lowest, highest, gaps = gap_ranges.len() / 2, "sent acknack"),
            Err(err) => {
                // A send failure means the link is gone.
                error!(%err, "failed to send acknack, shutting down");
                self.queue.producer().signal_shutdown();
            }
        }
    }

    fn load_gap_state(&mut self) {
        match self.snapshot_store.load(&self.config.station_name) {
            Ok(Some(snapshot)) => match SequenceGapTracker::from_snapshot(&snapshot) {
                Ok(tracker) => {
                    info!(
                        min = tracker.gap_list().min(),
                        max = tracker.gap_list().max(),
                        gaps = tracker.gap_list().total_gaps(),
                        "restored persisted gap state"
                    );
                    self.tracker = tracker;
                }
                Err(err) => {
                    warn!(%err, "persisted gap state is inconsistent, starting fresh");
                    self.tracker = SequenceGapTracker::new();
                }
            },
            Ok(None) => self.tracker = SequenceGapTracker::new(),
            Err(err) => {
                warn!(%err, "could not load persisted gap state, starting fresh");
                self.tracker = SequenceGapTracker::new();
            }
        }
    }

    fn persist_gap_state(&self) {
        if self.suppress_persist {
            return;
        }
        let snapshot = self.tracker.snapshot();
        match self.snapshot_store.save(&self.config.station_name, &snapshot) {
            Ok(()) => debug!("persisted gap state"),
            Err(err) => error!(%err, "failed to persist gap state"),
        }
    }

    fn shutdown_gracefully(&mut self, workers: Vec<Worker>) -> Vec<String> {
        self.state = SessionState::ShuttingDown;
        info!("shutting down session");

        self.stop.store(true, Ordering::SeqCst);
        self.persist_gap_state();

        if let Err(err) = self.transport.send_alert("Shutting down.") {
            debug!(%err, "could not deliver shutdown alert");
        }
        // Closing the link unblocks the frame receiver.
        self.transport.disconnect();

        let mut failures = Vec::new();
        for worker in workers {
            let name = worker.name();
            if let Some(message) = worker.join() {
                failures.push(format!("{name}: {message}"));
            }
        }

        info!(
            data_frames = self.data_frames_received.load(Ordering::Relaxed),
            "session closed"
        );
        failures
    }
}
