//! Monitor events recorded during a test run.
//!
//! An [`Event`] is one interval from the monitor timeline: a subject
//! ([`Locator`]), what happened to it ([`Message`]), where the signal came
//! from ([`Source`]) and the span of time it covers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RepeatCount, ValidationError};

/// Annotation holding how many times the event was observed.
pub const ANNOTATION_COUNT: &str = "count";
/// Annotation naming the constructor that synthesized the interval.
pub const ANNOTATION_CONSTRUCTED: &str = "constructed";
/// Annotation holding a lifecycle phase (e.g. `Update`).
pub const ANNOTATION_PHASE: &str = "phase";
/// Annotation holding node roles (e.g. `master,worker`).
pub const ANNOTATION_ROLES: &str = "roles";

/// Construction owner of synthesized node lifecycle intervals.
pub const CONSTRUCTION_OWNER_NODE_LIFECYCLE: &str = "node-lifecycle-constructor";
/// Construction owner of synthesized pod lifecycle intervals.
pub const CONSTRUCTION_OWNER_POD_LIFECYCLE: &str = "pod-lifecycle-constructor";

/// Reason emitted when a pod cannot be scheduled.
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";
/// Reason emitted when topology aware hints get disabled for a service.
pub const REASON_TOPOLOGY_HINTS_DISABLED: &str = "TopologyAwareHintsDisabled";
/// Reason of the pod lifecycle interval marking the start of a graceful delete.
pub const REASON_GRACEFUL_DELETE_STARTED: &str = "GracefulDelete";
/// Reason of the container lifecycle interval marking readiness.
pub const REASON_CONTAINER_READY: &str = "Ready";

/// Where an event was collected from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// A Kubernetes event object.
    KubeEvent,
    /// Node state transitions.
    NodeState,
    /// Pod and container state transitions.
    PodState,
    /// An e2e test run.
    E2eTest,
    /// Any other collector.
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Self::KubeEvent => "kube_event",
            Self::NodeState => "node_state",
            Self::PodState => "pod_state",
            Self::E2eTest => "e2e_test",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            "kube_event" => Self::KubeEvent,
            "node_state" => Self::NodeState,
            "pod_state" => Self::PodState,
            "e2e_test" => Self::E2eTest,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for Source {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// What kind of subject a locator identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Pod,
    Container,
    Node,
    E2eTest,
    #[default]
    Other,
}

/// A key within a locator.
///
/// Variant order is the canonical rendering order of the locator string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocatorKey {
    Namespace,
    Pod,
    Uid,
    Container,
    Node,
    E2eTest,
    Other(String),
}

impl LocatorKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Namespace => "ns",
            Self::Pod => "pod",
            Self::Uid => "uid",
            Self::Container => "container",
            Self::Node => "node",
            Self::E2eTest => "e2e-test",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for LocatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LocatorKey {
    fn from(s: &str) -> Self {
        match s {
            "ns" => Self::Namespace,
            "pod" => Self::Pod,
            "uid" => Self::Uid,
            "container" => Self::Container,
            "node" => Self::Node,
            "e2e-test" => Self::E2eTest,
            other => Self::Other(other.to_string()),
        }
    }
}

impl FromStr for LocatorKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Serialize for LocatorKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LocatorKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Identifies the subject of an event.
///
/// Renders as `key/value` pairs in canonical key order, e.g.
/// `ns/openshift-etcd pod/etcd-guard-1 node/n1`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default)]
    pub kind: LocatorKind,
    #[serde(default)]
    pub keys: BTreeMap<LocatorKey, String>,
}

impl Locator {
    pub fn new(kind: LocatorKind) -> Self {
        Self {
            kind,
            keys: BTreeMap::new(),
        }
    }

    /// Returns the value of a key, if present.
    pub fn get(&self, key: &LocatorKey) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    /// Returns the namespace, or `""` when the subject is not namespaced.
    pub fn namespace(&self) -> &str {
        self.get(&LocatorKey::Namespace).unwrap_or_default()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.keys {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}/{value}")?;
            first = false;
        }
        Ok(())
    }
}

/// What happened to the subject.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Machine readable reason code (e.g. `Unhealthy`).
    #[serde(default)]
    pub reason: String,
    /// Human readable text.
    #[serde(default)]
    pub human: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Message {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// How many times this message says it happened.
    ///
    /// A missing count means once. An unparsable count is logged and treated
    /// as zero.
    pub fn repeat_count(&self) -> RepeatCount {
        let Some(raw) = self.annotation(ANNOTATION_COUNT) else {
            return RepeatCount::ONCE;
        };
        RepeatCount::parse(raw).unwrap_or_else(|| {
            tracing::warn!(
                count = raw,
                reason = %self.reason,
                message = %self.human,
                "event had a non-integer count"
            );
            RepeatCount::UNPARSABLE
        })
    }
}

/// One interval on the monitor timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub source: Source,
    pub locator: Locator,
    pub message: Message,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Event {
    /// Starts building an event of the given source and subject kind.
    pub fn builder(source: Source, kind: LocatorKind) -> EventBuilder {
        EventBuilder::new(source, kind)
    }

    /// Checks that the event does not end before it starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.from > self.to {
            return Err(ValidationError::InvertedInterval {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }

    pub fn reason(&self) -> &str {
        &self.message.reason
    }

    pub fn namespace(&self) -> &str {
        self.locator.namespace()
    }

    pub fn repeat_count(&self) -> RepeatCount {
        self.message.repeat_count()
    }

    /// The string identifying "the same" event across occurrences:
    /// `<locator> - reason/<reason> <human>`.
    pub fn signature(&self) -> String {
        signature(&self.locator, &self.message)
    }
}

/// Builds the display signature of a locator and message.
pub fn signature(locator: &Locator, message: &Message) -> String {
    format!(
        "{locator} - reason/{} {}",
        message.reason, message.human
    )
}

/// Builder for [`Event`].
///
/// Timestamps default to the Unix epoch until set.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    fn new(source: Source, kind: LocatorKind) -> Self {
        Self {
            event: Event {
                source,
                locator: Locator::new(kind),
                message: Message::default(),
                from: DateTime::<Utc>::UNIX_EPOCH,
                to: DateTime::<Utc>::UNIX_EPOCH,
            },
        }
    }

    #[must_use]
    pub fn key(mut self, key: LocatorKey, value: impl Into<String>) -> Self {
        self.event.locator.keys.insert(key, value.into());
        self
    }

    #[must_use]
    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.key(LocatorKey::Namespace, namespace)
    }

    #[must_use]
    pub fn pod(self, pod: impl Into<String>) -> Self {
        self.key(LocatorKey::Pod, pod)
    }

    #[must_use]
    pub fn container(self, container: impl Into<String>) -> Self {
        self.key(LocatorKey::Container, container)
    }

    #[must_use]
    pub fn node(self, node: impl Into<String>) -> Self {
        self.key(LocatorKey::Node, node)
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.event.message.reason = reason.into();
        self
    }

    #[must_use]
    pub fn human(mut self, human: impl Into<String>) -> Self {
        self.event.message.human = human.into();
        self
    }

    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event
            .message
            .annotations
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn count(self, count: i64) -> Self {
        self.annotation(ANNOTATION_COUNT, count.to_string())
    }

    #[must_use]
    pub fn span(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.event.from = from;
        self.event.to = to;
        self
    }

    /// Finishes the event, rejecting inverted intervals.
    pub fn build(self) -> Result<Event, ValidationError> {
        self.event.validate()?;
        Ok(self.event)
    }
}

/// Shorthand for a repeated Kubernetes event about a pod.
pub fn kube_event(
    namespace: &str,
    pod: &str,
    reason: &str,
    human: &str,
    count: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Event, ValidationError> {
    let mut builder = Event::builder(Source::KubeEvent, LocatorKind::Pod);
    if !namespace.is_empty() {
        builder = builder.namespace(namespace);
    }
    if !pod.is_empty() {
        builder = builder.pod(pod);
    }
    builder
        .reason(reason)
        .human(human)
        .count(count)
        .span(from, to)
        .build()
}
