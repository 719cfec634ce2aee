//! Turning detected events into per-namespace verdicts.
//!
//! The rendered text is parsed by downstream tooling, so the exact format of
//! each line and block is fixed:
//!
//! ```text
//! event happened 50 times, something is wrong: <signature> From: 09:00:00Z To: 09:10:00Z result=reject
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use serde::Serialize;

use crate::detector::{Occurrence, Pathological};

/// Marker appended to lines reported as flakes.
pub const RESULT_ALLOW: &str = " result=allow ";
/// Marker appended to lines reported as failures.
pub const RESULT_REJECT: &str = " result=reject ";

const TIME_FORMAT: &str = "%H:%M:%SZ";

/// How results of a pass are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One verdict per known namespace, plus one for everything else.
    /// Pathological events fail.
    CoreNamespaces,
    /// A single verdict for all e2e namespaces. Pathological events only
    /// flake.
    E2eNamespaces,
}

impl Mode {
    pub const fn flake_only(self) -> bool {
        matches!(self, Self::E2eNamespaces)
    }
}

/// Outcome of one logical test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub name: String,
    /// Present when the test failed.
    pub failure_output: Option<String>,
}

impl Verdict {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_output: None,
        }
    }

    pub fn fail(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_output: Some(output.into()),
        }
    }

    pub const fn passed(&self) -> bool {
        self.failure_output.is_none()
    }
}

/// Rendered lines for one namespace bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventResult {
    pub failures: Vec<String>,
    pub flakes: Vec<String>,
}

impl EventResult {
    /// The failure text: failures block, then flakes block.
    pub fn failure_output(&self) -> String {
        let mut output = String::new();
        if !self.failures.is_empty() {
            let _ = write!(
                output,
                "{} events happened too frequently\n\n{}",
                self.failures.len(),
                self.failures.join("\n")
            );
        }
        if !self.flakes.is_empty() {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            let _ = write!(
                output,
                "{} events with known BZs\n\n{}",
                self.flakes.len(),
                self.flakes.join("\n")
            );
        }
        output
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.flakes.is_empty()
    }
}

/// Name of the verdict for a namespace bucket.
pub fn verdict_name(test_name: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        test_name.to_string()
    } else {
        format!("{test_name} for ns/{namespace}")
    }
}

/// Renders one detected event as a report line.
pub fn render_line(signature: &str, occurrence: &Occurrence<'_>, mode: Mode) -> String {
    let message = format!(
        "event happened {} times, something is wrong: {signature} From: {} To: {}",
        occurrence.count,
        occurrence.event.from.format(TIME_FORMAT),
        occurrence.event.to.format(TIME_FORMAT),
    );
    let marker = if mode.flake_only() {
        RESULT_ALLOW
    } else {
        RESULT_REJECT
    };
    append_to_first_line(&message, marker)
}

fn append_to_first_line(s: &str, add: &str) -> String {
    match s.split_once('\n') {
        Some((first, rest)) => format!("{first}{add}\n{rest}"),
        None => format!("{s}{add}"),
    }
}

/// Groups rendered lines by namespace.
///
/// Namespaces outside `known` collapse into the `""` bucket. Lines keep the
/// signature order of `pathological`.
pub fn bucket(
    pathological: &Pathological<'_>,
    known: &BTreeSet<String>,
    mode: Mode,
) -> BTreeMap<String, EventResult> {
    let mut results: BTreeMap<String, EventResult> = BTreeMap::new();
    for (signature, occurrence) in pathological {
        let namespace = occurrence.event.namespace();
        let namespace = if known.contains(namespace) {
            namespace
        } else {
            ""
        };
        let line = render_line(signature, occurrence, mode);
        let result = results.entry(namespace.to_string()).or_default();
        if mode.flake_only() {
            result.flakes.push(line);
        } else {
            result.failures.push(line);
        }
    }
    results
}

/// One verdict per known namespace and the `""` bucket.
///
/// A bucket with results gets a verdict carrying its failure text; if it only
/// has flakes it also gets a passing verdict. A bucket without results passes.
pub fn core_verdicts(
    test_name: &str,
    known: &BTreeSet<String>,
    results: &BTreeMap<String, EventResult>,
) -> Vec<Verdict> {
    let namespaces: BTreeSet<&str> = known
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(""))
        .collect();

    let mut verdicts = Vec::new();
    for namespace in namespaces {
        let name = verdict_name(test_name, namespace);
        match results.get(namespace) {
            Some(result) => {
                verdicts.push(Verdict::fail(&name, result.failure_output()));
                if result.failures.is_empty() && !result.flakes.is_empty() {
                    verdicts.push(Verdict::pass(name));
                }
            }
            None => verdicts.push(Verdict::pass(name)),
        }
    }
    verdicts
}

/// A single aggregate verdict for the `""` bucket.
pub fn e2e_verdicts(test_name: &str, results: &BTreeMap<String, EventResult>) -> Vec<Verdict> {
    let mut verdicts = Vec::new();
    if let Some(result) = results.get("") {
        if !result.is_empty() {
            verdicts.push(Verdict::fail(test_name, result.failure_output()));
        }
        if result.failures.is_empty() {
            verdicts.push(Verdict::pass(test_name));
        }
    }
    if verdicts.is_empty() {
        verdicts.push(Verdict::pass(test_name));
    }
    verdicts
}

/// Buckets the detected events and produces the verdicts for `mode`.
pub fn aggregate(
    test_name: &str,
    mode: Mode,
    known: &BTreeSet<String>,
    pathological: &Pathological<'_>,
) -> Vec<Verdict> {
    let results = bucket(pathological, known, mode);
    match mode {
        Mode::CoreNamespaces => core_verdicts(test_name, known, &results),
        Mode::E2eNamespaces => e2e_verdicts(test_name, &results),
    }
}
