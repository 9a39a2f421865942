//! Persisted gap-state snapshot
//!
//! Structured serde representation of a tracker's gap state, stored as JSON
//! keyed by station. Field names are load-bearing: existing snapshots written
//! by earlier consumers use exactly `startingSequenceNumber`, `gapList`,
//! `min`, `max`, `gaps`, `start`, `end` and `modifiedTime`.

use crate::gaps::{Gap, GapError, GapList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot encode/decode errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot contents are inconsistent: {0}")]
    Inconsistent(#[from] GapError),
}

/// One persisted gap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapRecord {
    pub start: u64,
    pub end: u64,
    pub modified_time: DateTime<Utc>,
}

/// Persisted form of a [`GapList`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapListSnapshot {
    pub min: u64,
    pub max: u64,
    pub gaps: Vec<GapRecord>,
}

/// Full persisted gap state for one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapStateSnapshot {
    pub starting_sequence_number: Option<u64>,
    pub gap_list: GapListSnapshot,
}

impl GapStateSnapshot {
    /// Serialize to the stored JSON text
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from the stored JSON text
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&GapList> for GapListSnapshot {
    fn from(list: &GapList) -> Self {
        GapListSnapshot {
            min: list.min(),
            max: list.max(),
            gaps: list
                .iter()
                .map(|gap| GapRecord {
                    start: gap.start,
                    end: gap.end,
                    modified_time: gap.modified,
                })
                .collect(),
        }
    }
}

impl TryFrom<&GapListSnapshot> for GapList {
    type Error = GapError;

    fn try_from(snapshot: &GapListSnapshot) -> Result<Self, GapError> {
        GapList::from_parts(
            snapshot.min,
            snapshot.max,
            snapshot
                .gaps
                .iter()
                .map(|record| Gap::with_modified(record.start, record.end, record.modified_time))
                .collect(),
        )
    }
}
