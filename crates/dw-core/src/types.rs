//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The event ends before it starts.
    #[error("event ends before it starts: from {from} is after to {to}")]
    InvertedInterval {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// How many times an event says it happened.
///
/// Derived from the `count` annotation rather than stored. An event without
/// the annotation happened once; an event whose annotation is not an integer
/// is treated as zero so it can never be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepeatCount(i64);

impl RepeatCount {
    /// A single occurrence.
    pub const ONCE: Self = Self(1);

    /// Count used when the annotation cannot be parsed.
    pub const UNPARSABLE: Self = Self(0);

    /// Creates a repeat count from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Parses the raw annotation value.
    ///
    /// Returns `None` if the value is not a base-10 integer.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse::<i64>().ok().map(Self)
    }

    /// Returns the inner value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Whether this count is above the pathological threshold.
    #[must_use]
    pub const fn exceeds(self, threshold: i64) -> bool {
        self.0 > threshold
    }
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
