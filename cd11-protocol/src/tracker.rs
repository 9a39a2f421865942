//! Sequence-number gap tracking for one CD-1.1 frameset
//!
//! Wraps a [`GapList`] with the consumer-side semantics: a starting sequence
//! number anchoring where meaningful tracking began, acknack reconciliation,
//! age-based gap expiry, and snapshot persistence.

use crate::frame::{Acknack, FrameError};
use crate::gaps::{GapError, GapList};
use crate::snapshot::{GapListSnapshot, GapStateSnapshot};
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::warn;

/// Sentinel returned by [`SequenceGapTracker::highest_sequence_number`] before
/// any data frame has been observed. On the wire this is the all-ones value
/// the protocol uses for "no frames acknowledged yet".
pub const NO_HIGHEST_SEQUENCE: u64 = u64::MAX;

/// Acceptance slack above the tracked maximum for non-data sequence numbers.
const NON_FRAME_WINDOW: u64 = 20;

/// Tracker update errors
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Gap(#[from] GapError),
}

/// Gap state for one remote station
///
/// Values below the starting sequence number are never reported as missing:
/// they predate the session and the provider may legitimately no longer hold
/// them.
#[derive(Debug, Clone)]
pub struct SequenceGapTracker {
    gap_list: GapList,
    starting_sequence_number: Option<u64>,
}

impl Default for SequenceGapTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceGapTracker {
    /// Create an empty tracker with the degenerate `[0, 0]` range
    pub fn new() -> Self {
        SequenceGapTracker {
            gap_list: GapList::default(),
            starting_sequence_number: None,
        }
    }

    /// Restore a tracker from a persisted snapshot
    pub fn from_snapshot(snapshot: &GapStateSnapshot) -> Result<Self, GapError> {
        Ok(SequenceGapTracker {
            gap_list: GapList::try_from(&snapshot.gap_list)?,
            starting_sequence_number: snapshot.starting_sequence_number,
        })
    }

    /// Capture the current gap state for persistence
    pub fn snapshot(&self) -> GapStateSnapshot {
        GapStateSnapshot {
            starting_sequence_number: self.starting_sequence_number,
            gap_list: GapListSnapshot::from(&self.gap_list),
        }
    }

    /// The underlying gap list
    pub fn gap_list(&self) -> &GapList {
        &self.gap_list
    }

    /// Starting sequence number, if any data frame has been observed
    pub fn starting_sequence_number(&self) -> Option<u64> {
        self.starting_sequence_number
    }

    /// Record one observed sequence number
    ///
    /// Data and command-response frames (`is_data_frame`) always widen the
    /// tracked range as needed and establish the starting sequence number on
    /// first sight. Non-frame values (provider-declared invalid ranges) are
    /// held to a narrow acceptance window so a single bad acknack cannot
    /// corrupt the tracked range.
    pub fn record_sequence_number(&mut self, value: u64, is_data_frame: bool) {
        self.process(value, is_data_frame);

        if is_data_frame && self.starting_sequence_number.is_none() {
            self.starting_sequence_number = Some(value);
        }
    }

    /// Apply a provider acknack to the tracked range
    ///
    /// On error the update is dropped whole and the caller is expected to log
    /// and carry on; acknack content problems are never fatal.
    pub fn reconcile(&mut self, acknack: &Acknack) -> Result<(), TrackerError> {
        // Validate frame content before touching any state.
        let pairs = acknack.gap_pairs()?;
        if acknack.lowest_seq_num > acknack.highest_seq_num {
            return Err(FrameError::InvertedAckRange {
                lowest: acknack.lowest_seq_num,
                highest: acknack.highest_seq_num,
            }
            .into());
        }

        if acknack.highest_seq_num < self.gap_list.min() {
            // The provider restarted its frame count: start over from the
            // acknowledged range.
            self.gap_list = GapList::new(acknack.lowest_seq_num, acknack.highest_seq_num)?;
            self.starting_sequence_number = None;
        } else {
            self.gap_list
                .set_bounds(acknack.lowest_seq_num, acknack.highest_seq_num)?;
        }

        // Non-compliant providers can walk the range below the session start.
        if let Some(start) = self.starting_sequence_number {
            if self.highest_sequence_number() < start {
                self.starting_sequence_number = None;
            }
        }

        // Mark the provider-declared invalid ranges as filled so they stop
        // being re-requested. Without a starting number every value would be
        // rejected by the acceptance window, so skip the walk entirely.
        if self.starting_sequence_number.is_some() {
            let current_min = self.gap_list.min();
            for (range_start, range_end_exclusive) in pairs {
                if range_end_exclusive.wrapping_sub(1) < current_min {
                    continue;
                }
                for value in range_start.max(current_min)..range_end_exclusive {
                    if value > self.gap_list.max().wrapping_add(NON_FRAME_WINDOW) {
                        // The range ascends and the window only grows on
                        // acceptance, so every later value is rejected too.
                        break;
                    }
                    self.process(value, false);
                }
            }
        }

        Ok(())
    }

    /// Lowest sequence number the consumer still cares about
    pub fn lowest_sequence_number(&self) -> u64 {
        match self.starting_sequence_number {
            Some(start) if start >= self.gap_list.min() => start,
            _ => self.gap_list.min(),
        }
    }

    /// Highest tracked sequence number, or [`NO_HIGHEST_SEQUENCE`] when no
    /// data frame has been observed and the range is still degenerate
    pub fn highest_sequence_number(&self) -> u64 {
        if self.starting_sequence_number.is_none() && self.gap_list.max() == 0 {
            NO_HIGHEST_SEQUENCE
        } else {
            self.gap_list.max()
        }
    }

    /// Gaps to report in an outbound acknack
    ///
    /// Inclusive-start / exclusive-end pairs. Gaps touching or below the
    /// lowest tracked sequence number are either resolved or outside
    /// tracking; gaps reaching past the current maximum carry incomplete
    /// trailing information. Both are dropped.
    pub fn reportable_gaps(&self) -> Vec<(u64, u64)> {
        if self.starting_sequence_number.is_none() {
            return Vec::new();
        }

        let pairs = match self.gap_list.gap_ranges(false, true) {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(%err, "gap ranges cannot be reported in exclusive form");
                return Vec::new();
            }
        };

        let lowest = self.lowest_sequence_number();
        let max = self.gap_list.max();
        pairs
            .into_iter()
            .filter(|&(start, end)| start > lowest && end <= max)
            .collect()
    }

    /// Drop gaps unmodified for `days` days; `0` disables expiry
    pub fn expire(&mut self, days: u32) {
        if days == 0 {
            return;
        }
        self.gap_list
            .expire_older_than(Utc::now() - Duration::days(i64::from(days)));
    }

    fn process(&mut self, value: u64, is_data_frame: bool) {
        if !is_data_frame {
            let rejected = self.starting_sequence_number.is_none()
                || value < 1
                || value < self.lowest_sequence_number()
                || value > self.gap_list.max().wrapping_add(NON_FRAME_WINDOW);
            if rejected {
                return;
            }
        }

        let result = if value > self.gap_list.max() {
            self.gap_list.widen_max(value)
        } else if value < self.gap_list.min() {
            self.gap_list.widen_min(value)
        } else {
            Ok(())
        };
        let result = result.and_then(|()| self.gap_list.mark_filled(value));

        if let Err(err) = result {
            warn!(value, %err, "ignoring invalid sequence number");
        }
    }
}
