//! CD-1.1 frame data model
//!
//! The wire codec lives outside this crate; a transport implementation hands
//! decoded frames to the consumer in this form. Only the fields the gap
//! tracking core acts on are represented here.

use bytes::Bytes;
use thiserror::Error;

/// Frame-content errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("acknack gap range array has odd length {0}")]
    OddGapRanges(usize),

    #[error("acknack lowest sequence number {lowest} exceeds highest {highest}")]
    InvertedAckRange { lowest: u64, highest: u64 },
}

/// Acknowledgment frame contents
///
/// `gap_ranges` is the flat even-length array from the wire: consecutive
/// (start-inclusive, end-exclusive) pairs of missing sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknack {
    pub frameset_acked: String,
    pub lowest_seq_num: u64,
    pub highest_seq_num: u64,
    pub gap_ranges: Vec<u64>,
}

impl Acknack {
    /// View the flat gap array as (start, end-exclusive) pairs
    ///
    /// An odd-length array is a protocol-data error; the whole frame is
    /// rejected rather than guessing at the intended pairing.
    pub fn gap_pairs(&self) -> Result<Vec<(u64, u64)>, FrameError> {
        if self.gap_ranges.len() % 2 != 0 {
            return Err(FrameError::OddGapRanges(self.gap_ranges.len()));
        }
        Ok(self
            .gap_ranges
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect())
    }
}

/// Data frame contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub sequence_number: u64,
    pub payload: Bytes,
}

/// A decoded CD-1.1 frame, as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Provider acknowledgment of received sequence ranges
    Acknack(Acknack),
    /// Station data payload carrying a sequence number
    Data(DataFrame),
    /// Command response; sequence number is tracked, payload is not
    CommandResponse { sequence_number: u64 },
    /// Command request (never valid at a consumer)
    CommandRequest,
    /// Provider-initiated connection teardown
    Alert { message: String },
    /// Option negotiation request
    OptionRequest,
    /// Option negotiation response
    OptionResponse,
    /// Discard all gap history and restart tracking from scratch
    Reset,
    /// Any other frame type the consumer does not act on
    Unsupported { kind: String },
}

impl Frame {
    /// Frame kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Acknack(_) => "acknack",
            Frame::Data(_) => "data",
            Frame::CommandResponse { .. } => "command-response",
            Frame::CommandRequest => "command-request",
            Frame::Alert { .. } => "alert",
            Frame::OptionRequest => "option-request",
            Frame::OptionResponse => "option-response",
            Frame::Reset => "reset",
            Frame::Unsupported { .. } => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_pairs_even() {
        let acknack = Acknack {
            frameset_acked: "STA01".into(),
            lowest_seq_num: 0,
            highest_seq_num: 100,
            gap_ranges: vec![3, 5, 10, 12],
        };
        assert_eq!(acknack.gap_pairs().unwrap(), vec![(3, 5), (10, 12)]);
    }

    #[test]
    fn test_gap_pairs_odd_rejected() {
        let acknack = Acknack {
            frameset_acked: "STA01".into(),
            lowest_seq_num: 0,
            highest_seq_num: 100,
            gap_ranges: vec![3, 5, 10],
        };
        assert_eq!(acknack.gap_pairs(), Err(FrameError::OddGapRanges(3)));
    }

    #[test]
    fn test_gap_pairs_empty() {
        let acknack = Acknack {
            frameset_acked: "STA01".into(),
            lowest_seq_num: 0,
            highest_seq_num: 100,
            gap_ranges: vec![],
        };
        assert!(acknack.gap_pairs().unwrap().is_empty());
    }
}
