//! Append-only timelines for lifecycle aggregates.
//!
//! Incidents carry a narrative timeline and change requests carry an audit
//! trail; both are the same structure: an ordered sequence of timestamped,
//! self-describing entries. Each entry records the aggregate's status at the
//! time of the append, so the history can be read without replaying
//! transitions.
//!
//! Entries are never updated or removed once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a timeline or audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Machine-readable event kind, e.g. `analysis_started`.
    pub kind: String,
    /// Human-readable description of what happened.
    pub description: String,
    /// Free-form structured detail payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    /// When the entry was appended.
    pub recorded_at: DateTime<Utc>,
    /// The aggregate's status at the time of the append.
    pub status_at: String,
}

/// An append-only ordered log of [`TimelineEntry`] values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// Creates an empty timeline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry. Entries are insertion-ordered and immutable.
    pub fn append(
        &mut self,
        kind: impl Into<String>,
        description: impl Into<String>,
        detail: Option<serde_json::Value>,
        recorded_at: DateTime<Utc>,
        status_at: impl Into<String>,
    ) {
        self.entries.push(TimelineEntry {
            kind: kind.into(),
            description: description.into(),
            detail,
            recorded_at,
            status_at: status_at.into(),
        });
    }

    /// Returns all entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the timeline has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the most recent entry, if any.
    #[must_use]
    pub fn last(&self) -> Option<&TimelineEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let mut timeline = Timeline::new();
        let now = Utc::now();
        timeline.append("detected", "Incident detected", None, now, "detected");
        timeline.append(
            "analysis_started",
            "Analysis started",
            Some(serde_json::json!({"analyst": "a.jones"})),
            now,
            "analyzing",
        );

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.entries()[0].kind, "detected");
        assert_eq!(timeline.last().map(|e| e.kind.as_str()), Some("analysis_started"));
    }

    #[test]
    fn entry_records_status_at_append_time() {
        let mut timeline = Timeline::new();
        timeline.append("contained", "Containment", None, Utc::now(), "contained");
        assert_eq!(timeline.entries()[0].status_at, "contained");
    }

    #[test]
    fn serde_is_transparent() {
        let mut timeline = Timeline::new();
        timeline.append("noted", "note", None, Utc::now(), "draft");
        let json = serde_json::to_value(&timeline).unwrap();
        assert!(json.is_array());
    }
}
