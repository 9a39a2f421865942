//! CD-1.1 Data Consumer
//!
//! One session per station: listen for the Data Provider, track received
//! sequence numbers, answer with acknacks, persist gap state, and tear down
//! cleanly on alert, reset, expiry or request.

pub mod config;
pub mod event;
pub mod session;
pub mod storage;
pub mod transport;
pub mod worker;

pub use config::{Config, ConfigError, StationConfig};
pub use event::{Event, EventProducer, EventQueue};
pub use session::{ConsumerSession, SessionError, SessionHandle, SessionState};
pub use storage::{DataRecord, FrameStore, FsSnapshotStore, GapSnapshotStore, StorageError};
pub use transport::{FrameTransport, TransportError};
pub use worker::{ContactClock, Worker, WorkerError};
