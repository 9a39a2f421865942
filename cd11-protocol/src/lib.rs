//! CD-1.1 Protocol Core
//!
//! This crate implements the gap-tracking core of a CD-1.1 Data Consumer:
//! the bounded gap list, the sequence-number tracker with acknack
//! reconciliation and expiry, the persisted snapshot format, and the frame
//! data model handed over by the external wire codec.

pub mod frame;
pub mod gaps;
pub mod snapshot;
pub mod tracker;

pub use frame::{Acknack, DataFrame, Frame, FrameError};
pub use gaps::{Gap, GapError, GapList};
pub use snapshot::{GapListSnapshot, GapRecord, GapStateSnapshot, SnapshotError};
pub use tracker::{SequenceGapTracker, TrackerError, NO_HIGHEST_SEQUENCE};
