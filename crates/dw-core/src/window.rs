//! Exemption windows derived from the timeline itself.
//!
//! Some reasons are expected to repeat while something else is going on in
//! the cluster. Two window sets are computed up front, before detection:
//!
//! 1. Control plane node updates, during which `FailedScheduling` is expected.
//! 2. `NoExecuteTaintManager` test runs, during which
//!    `TopologyAwareHintsDisabled` is expected. These windows are widened until
//!    the DNS pods evicted by the test have been replaced and become ready,
//!    since the event lags behind the test by however long that takes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{
    ANNOTATION_CONSTRUCTED, ANNOTATION_PHASE, ANNOTATION_ROLES, CONSTRUCTION_OWNER_NODE_LIFECYCLE,
    CONSTRUCTION_OWNER_POD_LIFECYCLE, Event, LocatorKey, LocatorKind, REASON_CONTAINER_READY,
    REASON_FAILED_SCHEDULING, REASON_GRACEFUL_DELETE_STARTED, REASON_TOPOLOGY_HINTS_DISABLED,
    Source,
};

const TAINT_MANAGER_TEST: &str = "NoExecuteTaintManager";
const DNS_NAMESPACE: &str = "openshift-dns";
const DNS_POD_PREFIX: &str = "dns-default";
const DNS_CONTAINER: &str = "dns";

/// A span of time during which some reason is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    fn of(event: &Event) -> Self {
        Self {
            from: event.from,
            to: event.to,
        }
    }

    /// Whether the event lies strictly inside this window.
    pub fn strictly_contains(&self, event: &Event) -> bool {
        self.from < event.from && self.to > event.to
    }
}

/// Which exemption applied to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exemption {
    /// `FailedScheduling` during a control plane node update.
    NodeUpdate,
    /// `TopologyAwareHintsDisabled` during the taint manager test.
    TopologyHints,
}

/// Both exemption window sets for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptionWindows {
    node_updates: Vec<TimeWindow>,
    topology_hints: Vec<TimeWindow>,
}

impl ExemptionWindows {
    /// Computes both window sets from the events of one pass.
    pub fn build(events: &[&Event]) -> Self {
        let node_updates: Vec<TimeWindow> = events
            .iter()
            .copied()
            .filter(|event| is_master_node_update(event))
            .map(TimeWindow::of)
            .collect();
        tracing::info!(count = node_updates.len(), "found NodeUpdate intervals");

        let dns_lifecycle: Vec<&Event> = events
            .iter()
            .copied()
            .filter(|event| is_dns_lifecycle(event))
            .collect();

        let topology_hints: Vec<TimeWindow> = events
            .iter()
            .copied()
            .filter(|event| is_taint_manager_test(event))
            .map(|test| {
                let base = TimeWindow::of(test);
                let widened = widen_until_dns_ready(base, &dns_lifecycle);
                tracing::info!(
                    from = %base.from,
                    to = %base.to,
                    adjusted_to = %widened.to,
                    "found time range for NoExecuteTaintManager test"
                );
                widened
            })
            .collect();

        Self {
            node_updates,
            topology_hints,
        }
    }

    pub fn node_updates(&self) -> &[TimeWindow] {
        &self.node_updates
    }

    pub fn topology_hints(&self) -> &[TimeWindow] {
        &self.topology_hints
    }

    /// Returns the exemption and window covering the event, if any.
    ///
    /// Only the two watched reasons can be exempt.
    pub fn exempting(&self, event: &Event) -> Option<(Exemption, TimeWindow)> {
        let (exemption, windows) = match event.reason() {
            REASON_FAILED_SCHEDULING => (Exemption::NodeUpdate, &self.node_updates),
            REASON_TOPOLOGY_HINTS_DISABLED => (Exemption::TopologyHints, &self.topology_hints),
            _ => return None,
        };
        windows
            .iter()
            .find(|window| window.strictly_contains(event))
            .map(|window| (exemption, *window))
    }
}

fn is_master_node_update(event: &Event) -> bool {
    let message = &event.message;
    event.source == Source::NodeState
        && event.locator.kind == LocatorKind::Node
        && message.annotation(ANNOTATION_CONSTRUCTED) == Some(CONSTRUCTION_OWNER_NODE_LIFECYCLE)
        && message.annotation(ANNOTATION_PHASE) == Some("Update")
        && message
            .annotation(ANNOTATION_ROLES)
            .is_some_and(|roles| roles.contains("master"))
}

fn is_taint_manager_test(event: &Event) -> bool {
    event.source == Source::E2eTest
        && event
            .locator
            .get(&LocatorKey::E2eTest)
            .is_some_and(|test| test.contains(TAINT_MANAGER_TEST))
}

fn is_dns_lifecycle(event: &Event) -> bool {
    event.source == Source::PodState
        && matches!(event.locator.kind, LocatorKind::Pod | LocatorKind::Container)
        && event.namespace() == DNS_NAMESPACE
        && event.message.annotation(ANNOTATION_CONSTRUCTED) == Some(CONSTRUCTION_OWNER_POD_LIFECYCLE)
}

/// Extends the window end to the last DNS container readiness that settles
/// the replacements started during it.
///
/// Walks DNS lifecycle events from the window start in timeline order,
/// counting graceful deletes of `dns-default` pods and the `dns` container
/// readiness events that answer them. The walk stops at the first event past
/// the window end once nothing is pending. The end never moves earlier.
fn widen_until_dns_ready(window: TimeWindow, dns_lifecycle: &[&Event]) -> TimeWindow {
    let mut last_ready: Option<DateTime<Utc>> = None;
    let mut pending: u32 = 0;

    for event in dns_lifecycle {
        if event.from < window.from {
            continue;
        }
        let reason = event.reason();
        if reason == REASON_GRACEFUL_DELETE_STARTED
            && event
                .locator
                .get(&LocatorKey::Pod)
                .is_some_and(|pod| pod.contains(DNS_POD_PREFIX))
        {
            pending += 1;
        }
        if reason == REASON_CONTAINER_READY
            && event.locator.get(&LocatorKey::Container) == Some(DNS_CONTAINER)
            && pending > 0
        {
            last_ready = Some(event.from);
            pending -= 1;
        }
        if event.from > window.to && pending == 0 {
            return match last_ready {
                Some(ready) if ready > window.to => TimeWindow {
                    from: window.from,
                    to: ready,
                },
                _ => window,
            };
        }
    }
    window
}
