//! Core logic for detecting pathologically repeating events.
//!
//! This crate contains:
//! - Event model: monitor intervals, locators, repeat counts
//! - Exemption windows: spans where specific reasons are expected
//! - Allowances: known repeating patterns that are tolerated
//! - Detection and aggregation into per-namespace verdicts

pub mod allowance;
mod context;
mod detector;
pub mod event;
mod evaluator;
mod timeline;
mod types;
pub mod verdict;
pub mod window;

pub use allowance::{
    AllowanceRule, AllowanceSet, AllowanceSpec, Candidate, JobKind, JobScope, PatternRule,
    PredicateRule, RuleError, compile_specs,
};
pub use context::ClusterContext;
pub use detector::{DuplicateDetector, Occurrence, Pathological};
pub use event::{Event, EventBuilder, Locator, LocatorKey, LocatorKind, Message, Source};
pub use evaluator::{
    CORE_TEST_NAME, DEFAULT_KNOWN_NAMESPACES, DEFAULT_THRESHOLD, E2E_TEST_NAME, Evaluator,
    EvaluatorConfig,
};
pub use timeline::{Timeline, TimelineError, is_e2e_namespace};
pub use types::{RepeatCount, ValidationError};
pub use verdict::{EventResult, Mode, Verdict};
pub use window::{ExemptionWindows, TimeWindow};
