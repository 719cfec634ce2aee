//! Allowances for known repeating events.
//!
//! An [`AllowanceSet`] is an ordered, immutable list of [`AllowanceRule`]s.
//! The first rule that matches a pathological event allows it; if none
//! matches the event is reported.
//!
//! Rules come in two flavours:
//! - [`PatternRule`]: regexes over the display signature and structured
//!   fields, optionally scoped to platforms or a control plane topology.
//! - [`PredicateRule`]: arbitrary logic that can look at the repeat count and
//!   the cluster context, such as the etcd guard revision budget.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ClusterContext;
use crate::event::{Event, Locator, LocatorKey, Message, signature};
use crate::types::RepeatCount;

/// Id of the etcd guard readiness probe allowance.
pub const ETCD_GUARD_RULE_ID: &str = "etcd-guard-readiness-per-revision";

/// Guard probe failures tolerated per etcd revision: 60s for a new etcd pod
/// to start, divided by the 5s probe period.
pub const ETCD_GUARD_FAILURES_PER_REVISION: i64 = 60 / 5;

static ETCD_GUARD_PROBE_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"ns/openshift-etcd pod/etcd-guard-.* node/[a-z0-9.-]+ - reason/(Unhealthy|ProbeError) Readiness probe.*",
    )
    .expect("etcd guard pattern is valid")
});

/// Errors raised while constructing allowance rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule had an empty id.
    #[error("allowance id cannot be empty")]
    EmptyId,
    /// A rule had no constraints and would allow everything.
    #[error("allowance {id} has no constraints")]
    Unconstrained { id: String },
    /// A pattern did not compile.
    #[error("allowance {id}: invalid {field} pattern: {source}")]
    InvalidPattern {
        id: String,
        field: String,
        #[source]
        source: regex::Error,
    },
}

/// Which job kinds an allowance applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobScope {
    /// Every job.
    #[default]
    All,
    /// Upgrade jobs only.
    Upgrade,
}

/// The kind of job being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// A job that never upgrades the cluster.
    Stable,
    /// A job that upgrades the cluster.
    Upgrade,
}

impl JobScope {
    pub const fn applies_to(self, job: JobKind) -> bool {
        match self {
            Self::All => true,
            Self::Upgrade => matches!(job, JobKind::Upgrade),
        }
    }
}

/// Declarative description of a pattern allowance, as found in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceSpec {
    /// Identifier reported when the rule matches.
    pub id: String,
    /// Regex over the display signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Regexes over locator values, keyed by locator key (e.g. `ns`, `pod`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locator: BTreeMap<String, String>,
    /// Regex over the reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Regex over the human message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Platforms the rule is limited to. Empty means any platform.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    /// Control plane topology the rule is limited to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
    #[serde(default)]
    pub jobs: JobScope,
}

/// The pathological event being judged.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub locator: &'a Locator,
    pub message: &'a Message,
    pub repeat_count: RepeatCount,
}

impl<'a> Candidate<'a> {
    pub fn new(event: &'a Event, repeat_count: RepeatCount) -> Self {
        Self {
            locator: &event.locator,
            message: &event.message,
            repeat_count,
        }
    }

    pub fn signature(&self) -> String {
        signature(self.locator, self.message)
    }
}

/// Static allowance built from an [`AllowanceSpec`].
///
/// Every constraint present must hold for the rule to match.
#[derive(Debug, Clone)]
pub struct PatternRule {
    id: String,
    signature: Option<Regex>,
    locator: Vec<(LocatorKey, Regex)>,
    reason: Option<Regex>,
    message: Option<Regex>,
    platforms: BTreeSet<String>,
    topology: Option<String>,
}

impl PatternRule {
    pub fn compile(spec: &AllowanceSpec) -> Result<Self, RuleError> {
        if spec.id.is_empty() {
            return Err(RuleError::EmptyId);
        }
        let unconstrained = spec.signature.is_none()
            && spec.locator.is_empty()
            && spec.reason.is_none()
            && spec.message.is_none();
        if unconstrained {
            return Err(RuleError::Unconstrained {
                id: spec.id.clone(),
            });
        }

        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
                id: spec.id.clone(),
                field: field.to_string(),
                source,
            })
        };

        let locator = spec
            .locator
            .iter()
            .map(|(key, pattern)| {
                Ok((LocatorKey::from(key.as_str()), compile(key.as_str(), pattern.as_str())?))
            })
            .collect::<Result<Vec<_>, RuleError>>()?;

        Ok(Self {
            id: spec.id.clone(),
            signature: spec
                .signature
                .as_deref()
                .map(|p| compile("signature", p))
                .transpose()?,
            locator,
            reason: spec
                .reason
                .as_deref()
                .map(|p| compile("reason", p))
                .transpose()?,
            message: spec
                .message
                .as_deref()
                .map(|p| compile("message", p))
                .transpose()?,
            platforms: spec.platforms.iter().cloned().collect(),
            topology: spec.topology.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, candidate: &Candidate<'_>, context: &ClusterContext) -> bool {
        if !self.platforms.is_empty()
            && !context
                .platform
                .as_ref()
                .is_some_and(|p| self.platforms.contains(p))
        {
            return false;
        }
        if let Some(topology) = &self.topology {
            if context.topology.as_ref() != Some(topology) {
                return false;
            }
        }
        if let Some(reason) = &self.reason {
            if !reason.is_match(&candidate.message.reason) {
                return false;
            }
        }
        if let Some(message) = &self.message {
            if !message.is_match(&candidate.message.human) {
                return false;
            }
        }
        let locator_matches = self.locator.iter().all(|(key, pattern)| {
            candidate
                .locator
                .get(key)
                .is_some_and(|value| pattern.is_match(value))
        });
        if !locator_matches {
            return false;
        }
        self.signature
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(&candidate.signature()))
    }
}

type Predicate = dyn Fn(&Candidate<'_>, &ClusterContext) -> bool + Send + Sync;

/// Allowance backed by arbitrary logic.
pub struct PredicateRule {
    id: String,
    predicate: Box<Predicate>,
}

impl PredicateRule {
    pub fn new(
        id: impl Into<String>,
        predicate: impl Fn(&Candidate<'_>, &ClusterContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for PredicateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateRule")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A single allowance.
#[derive(Debug)]
pub enum AllowanceRule {
    Pattern(PatternRule),
    Predicate(PredicateRule),
}

impl AllowanceRule {
    /// Tolerates etcd guard readiness probe failures while the etcd operator
    /// rolls out revisions.
    ///
    /// The guards are static pods, so every etcd pod restart during a rollout
    /// fails their readiness probe for a while. Up to
    /// [`ETCD_GUARD_FAILURES_PER_REVISION`] failures per revision are allowed;
    /// with revision 0 nothing is.
    pub fn etcd_guard_revision_budget(current_revision: i64) -> Self {
        let budget = ETCD_GUARD_FAILURES_PER_REVISION.saturating_mul(current_revision);
        Self::Predicate(PredicateRule::new(
            ETCD_GUARD_RULE_ID,
            move |candidate, _context| {
                budget > candidate.repeat_count.value()
                    && ETCD_GUARD_PROBE_FAILURE.is_match(&candidate.signature())
            },
        ))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Pattern(rule) => rule.id(),
            Self::Predicate(rule) => rule.id(),
        }
    }

    pub fn allows(&self, candidate: &Candidate<'_>, context: &ClusterContext) -> bool {
        match self {
            Self::Pattern(rule) => rule.matches(candidate, context),
            Self::Predicate(rule) => (rule.predicate)(candidate, context),
        }
    }
}

impl From<PatternRule> for AllowanceRule {
    fn from(rule: PatternRule) -> Self {
        Self::Pattern(rule)
    }
}

impl From<PredicateRule> for AllowanceRule {
    fn from(rule: PredicateRule) -> Self {
        Self::Predicate(rule)
    }
}

/// Ordered rules evaluated first match wins.
#[derive(Debug, Default)]
pub struct AllowanceSet {
    rules: Vec<AllowanceRule>,
}

impl AllowanceSet {
    pub fn new(rules: Vec<AllowanceRule>) -> Self {
        Self { rules }
    }

    /// Builds a set from the specs that apply to `job`.
    pub fn from_specs(specs: &[AllowanceSpec], job: JobKind) -> Result<Self, RuleError> {
        compile_specs(specs, job).map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(AllowanceRule::id)
    }

    /// Returns the id of the first rule allowing the candidate, or `None`
    /// when the event is not allowed.
    pub fn evaluate(&self, candidate: &Candidate<'_>, context: &ClusterContext) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.allows(candidate, context))
            .map(AllowanceRule::id)
    }
}

/// Compiles the specs that apply to `job`, base rules before upgrade-only
/// rules.
pub fn compile_specs(specs: &[AllowanceSpec], job: JobKind) -> Result<Vec<AllowanceRule>, RuleError> {
    let base = specs.iter().filter(|spec| spec.jobs == JobScope::All);
    let upgrade = specs
        .iter()
        .filter(|spec| spec.jobs != JobScope::All && spec.jobs.applies_to(job));
    base.chain(upgrade)
        .map(|spec| PatternRule::compile(spec).map(AllowanceRule::Pattern))
        .collect()
}
