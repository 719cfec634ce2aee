//! Loading and scoping the monitor timeline.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::event::Event;
use crate::types::ValidationError;

/// Namespaces created by e2e tests carry this prefix.
pub const E2E_NAMESPACE_PREFIX: &str = "e2e-";

/// Errors raised while loading a timeline.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// The timeline file could not be read.
    #[error("failed to read timeline {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A JSON array timeline could not be parsed.
    #[error("invalid timeline JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// A line of a JSONL timeline could not be parsed.
    #[error("invalid event on line {line}: {source}")]
    JsonLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// An event failed validation.
    #[error("invalid event at index {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

/// A validated sequence of events ordered by `(from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    events: Vec<Event>,
}

impl Timeline {
    /// Validates each event and sorts them into timeline order.
    ///
    /// Validation errors carry the index in the input order. The sort is
    /// stable, so events with identical bounds keep their input order.
    pub fn new(mut events: Vec<Event>) -> Result<Self, TimelineError> {
        for (index, event) in events.iter().enumerate() {
            event
                .validate()
                .map_err(|source| TimelineError::Invalid { index, source })?;
        }
        events.sort_by_key(|event| (event.from, event.to));
        Ok(Self { events })
    }

    /// Parses a timeline from either a JSON array or JSON lines.
    pub fn from_json_str(input: &str) -> Result<Self, TimelineError> {
        let trimmed = input.trim_start();
        if trimmed.starts_with('[') {
            let events: Vec<Event> = serde_json::from_str(trimmed).map_err(TimelineError::Json)?;
            return Self::new(events);
        }

        let mut events = Vec::new();
        for (idx, line) in input.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(line)
                .map_err(|source| TimelineError::JsonLine {
                    line: idx + 1,
                    source,
                })?;
            events.push(event);
        }
        Self::new(events)
    }

    /// Reads and parses a timeline file.
    pub fn load(path: &Path) -> Result<Self, TimelineError> {
        let content = std::fs::read_to_string(path).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Splits into events outside and inside e2e namespaces, keeping order.
    pub fn partition_e2e(&self) -> (Vec<&Event>, Vec<&Event>) {
        self.events
            .iter()
            .partition(|event| !is_e2e_namespace(event.namespace()))
    }
}

/// Whether a namespace was created by an e2e test.
pub fn is_e2e_namespace(namespace: &str) -> bool {
    namespace.starts_with(E2E_NAMESPACE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSONL: &str = r#"
{"source":"kube_event","locator":{"kind":"pod","keys":{"ns":"openshift-etcd","pod":"etcd-0"}},"message":{"reason":"Unhealthy","human":"probe failed","annotations":{"count":"30"}},"from":"2025-01-15T09:00:00Z","to":"2025-01-15T09:01:00Z"}

{"source":"kube_event","locator":{"kind":"pod","keys":{"ns":"e2e-test-abc","pod":"client"}},"message":{"reason":"BackOff","human":"Back-off"},"from":"2025-01-15T09:02:00Z","to":"2025-01-15T09:03:00Z"}
"#;

    #[test]
    fn parses_json_lines_and_skips_blank_lines() {
        let timeline = Timeline::from_json_str(JSONL).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.events()[0].reason(), "Unhealthy");
    }

    #[test]
    fn events_are_sorted_by_interval() {
        let lines: Vec<&str> = JSONL.lines().filter(|l| !l.trim().is_empty()).collect();
        let reversed = format!("{}\n{}\n", lines[1], lines[0]);
        let timeline = Timeline::from_json_str(&reversed).unwrap();
        let reasons: Vec<&str> = timeline.events().iter().map(Event::reason).collect();
        assert_eq!(reasons, vec!["Unhealthy", "BackOff"]);
    }

    #[test]
    fn parses_json_array() {
        let array = format!(
            "[{}]",
            JSONL
                .lines()
                .filter(|l| !l.trim().is_empty())
                .collect::<Vec<_>>()
                .join(",")
        );
        let timeline = Timeline::from_json_str(&array).unwrap();
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn reports_line_of_bad_event() {
        let input = "{\"source\":\"kube_event\"}\n";
        let err = Timeline::from_json_str(input).unwrap_err();
        assert!(matches!(err, TimelineError::JsonLine { line: 1, .. }));
    }

    #[test]
    fn rejects_inverted_interval() {
        let input = r#"[{"source":"kube_event","locator":{},"message":{},"from":"2025-01-15T09:05:00Z","to":"2025-01-15T09:00:00Z"}]"#;
        let err = Timeline::from_json_str(input).unwrap_err();
        assert!(matches!(err, TimelineError::Invalid { index: 0, .. }));
    }

    #[test]
    fn empty_input_is_empty_timeline() {
        let timeline = Timeline::from_json_str("").unwrap();
        assert!(timeline.is_empty());
    }

    #[test]
    fn partition_splits_on_e2e_prefix() {
        let timeline = Timeline::from_json_str(JSONL).unwrap();
        let (core, e2e) = timeline.partition_e2e();
        assert_eq!(core.len(), 1);
        assert_eq!(e2e.len(), 1);
        assert_eq!(e2e[0].namespace(), "e2e-test-abc");
    }

    #[test]
    fn e2e_namespace_detection() {
        assert!(is_e2e_namespace("e2e-kubectl-1234"));
        assert!(!is_e2e_namespace("openshift-e2e-loki"));
        assert!(!is_e2e_namespace(""));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Timeline::load(Path::new("/nonexistent/timeline.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/timeline.json"));
    }
}
