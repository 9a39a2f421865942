//! Frame transport seam
//!
//! The wire codec is pluggable: the session only needs blocking frame reads
//! and a handful of outbound frame kinds. Integration tests drive the session
//! through a scripted implementation of this trait.

use cd11_protocol::Frame;
use std::net::TcpStream;
use thiserror::Error;

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O failure on provider link: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider link is disconnected")]
    Disconnected,

    #[error("malformed frame on the wire: {0}")]
    Codec(String),
}

/// Blocking frame transport to one Data Provider
///
/// `read` blocks until a frame arrives or the link drops. `disconnect` must
/// unblock any thread sitting in `read`; after it, `read` returns
/// [`TransportError::Disconnected`].
pub trait FrameTransport: Send + Sync {
    /// Attach an accepted provider connection
    fn connect(&self, stream: TcpStream) -> Result<(), TransportError>;

    /// Block until the next frame arrives
    fn read(&self) -> Result<Frame, TransportError>;

    /// Send an acknack; `gap_ranges` is the flat start/end-exclusive array
    fn send_acknack(
        &self,
        frameset_acked: &str,
        lowest_seq_num: u64,
        highest_seq_num: u64,
        gap_ranges: &[u64],
    ) -> Result<(), TransportError>;

    /// Send an alert frame announcing connection teardown
    fn send_alert(&self, message: &str) -> Result<(), TransportError>;

    /// Answer an option request
    fn send_option_response(&self, station_name: &str) -> Result<(), TransportError>;

    /// Tear the link down and unblock any pending `read`
    fn disconnect(&self);
}
