//! Coalescing log of realtime protocol events.
//!
//! Observability only: nothing in the session reads it back to make
//! decisions. Consecutive events of the same type collapse into one entry
//! with a repeat count, so a burst of audio appends shows up as a single row.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::realtime::EventSource;

/// One row of the event log.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    /// Offset since session start, `mm:ss.hh`
    pub time: String,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Number of adjacent events folded into this row
    pub count: u32,
}

struct Inner {
    started: Instant,
    entries: Vec<RealtimeEvent>,
}

pub struct EventLog {
    inner: Mutex<Inner>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                started: Instant::now(),
                entries: Vec::new(),
            }),
        }
    }

    /// Append an event, folding it into the last entry when the types match.
    ///
    /// Returns the index and current state of the entry that was touched.
    pub fn record(
        &self,
        source: EventSource,
        event_type: &str,
        payload: serde_json::Value,
    ) -> (usize, RealtimeEvent) {
        tracing::debug!(%source, event_type, "realtime event");

        let mut inner = self.inner.lock();
        if let Some(last) = inner.entries.last_mut()
            && last.event_type == event_type
        {
            last.count += 1;
            let touched = last.clone();
            return (inner.entries.len() - 1, touched);
        }

        let time = format_offset(inner.started.elapsed());
        let entry = RealtimeEvent {
            time,
            source,
            event_type: event_type.to_string(),
            payload,
            count: 1,
        };
        inner.entries.push(entry.clone());
        (inner.entries.len() - 1, entry)
    }

    /// Drop all entries and restart the clock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.started = Instant::now();
    }

    pub fn entries(&self) -> Vec<RealtimeEvent> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Format a session offset as `mm:ss.hh` (minutes wrap at 60).
pub fn format_offset(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    let hundredths = (ms / 10) % 100;
    let seconds = (ms / 1000) % 60;
    let minutes = (ms / 60_000) % 60;
    format!("{:02}:{:02}.{:02}", minutes, seconds, hundredths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coalesces_adjacent_only() {
        let log = EventLog::new();
        for t in ["A", "A", "A", "B", "A"] {
            log.record(EventSource::Server, t, json!({"type": t}));
        }

        let entries = log.entries();
        let summary: Vec<(&str, u32)> = entries
            .iter()
            .map(|e| (e.event_type.as_str(), e.count))
            .collect();
        assert_eq!(summary, vec![("A", 3), ("B", 1), ("A", 1)]);
    }

    #[test]
    fn test_coalesced_entry_keeps_first_payload() {
        let log = EventLog::new();
        log.record(EventSource::Client, "input_audio_buffer.append", json!({"n": 1}));
        log.record(EventSource::Client, "input_audio_buffer.append", json!({"n": 2}));

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["n"], 1);
        assert_eq!(entries[0].count, 2);
    }

    #[test]
    fn test_record_reports_touched_entry() {
        let log = EventLog::new();
        let (index, entry) = log.record(EventSource::Server, "A", json!({}));
        assert_eq!((index, entry.count), (0, 1));
        let (index, entry) = log.record(EventSource::Server, "A", json!({}));
        assert_eq!((index, entry.count), (0, 2));
        let (index, _) = log.record(EventSource::Server, "B", json!({}));
        assert_eq!(index, 1);
    }

    #[test]
    fn test_reset() {
        let log = EventLog::new();
        log.record(EventSource::Server, "session.created", json!({}));
        assert!(!log.is_empty());
        log.reset();
        assert!(log.is_empty());
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(Duration::from_millis(0)), "00:00.00");
        assert_eq!(format_offset(Duration::from_millis(1_234)), "00:01.23");
        assert_eq!(format_offset(Duration::from_millis(61_505)), "01:01.50");
        assert_eq!(format_offset(Duration::from_secs(3_600)), "00:00.00");
    }

    #[test]
    fn test_serializes_type_field() {
        let log = EventLog::new();
        log.record(EventSource::Server, "error", json!({}));
        let value = serde_json::to_value(log.entries()).unwrap();
        assert_eq!(value[0]["type"], "error");
        assert_eq!(value[0]["source"], "server");
    }
}
