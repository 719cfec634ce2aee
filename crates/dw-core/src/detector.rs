//! The detection pass over one scope of the timeline.

use std::collections::BTreeMap;

use crate::allowance::{AllowanceSet, Candidate};
use crate::context::ClusterContext;
use crate::event::Event;
use crate::types::RepeatCount;
use crate::window::ExemptionWindows;

/// The representative occurrence of a repeating event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence<'e> {
    pub event: &'e Event,
    pub count: RepeatCount,
}

/// Pathological, unallowed events keyed by display signature.
pub type Pathological<'e> = BTreeMap<String, Occurrence<'e>>;

/// Finds events that repeated more than the threshold and are not tolerated.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector<'a> {
    threshold: i64,
    allowances: &'a AllowanceSet,
    context: &'a ClusterContext,
}

impl<'a> DuplicateDetector<'a> {
    pub const fn new(threshold: i64, allowances: &'a AllowanceSet, context: &'a ClusterContext) -> Self {
        Self {
            threshold,
            allowances,
            context,
        }
    }

    /// Runs the pass.
    ///
    /// Events inside an exemption window are skipped regardless of count.
    /// For each signature the occurrence with the highest count is kept; on a
    /// tie the first one seen stays.
    pub fn detect<'e>(&self, events: &[&'e Event], windows: &ExemptionWindows) -> Pathological<'e> {
        let mut pathological = Pathological::new();

        for &event in events {
            if let Some((exemption, window)) = windows.exempting(event) {
                tracing::info!(
                    event = %event.signature(),
                    ?exemption,
                    window_from = %window.from,
                    window_to = %window.to,
                    "ignoring event inside exemption window"
                );
                continue;
            }

            let count = event.repeat_count();
            if !count.exceeds(self.threshold) {
                continue;
            }

            let candidate = Candidate::new(event, count);
            if let Some(rule) = self.allowances.evaluate(&candidate, self.context) {
                tracing::debug!(event = %candidate.signature(), %count, rule, "event allowed");
                continue;
            }

            let occurrence = Occurrence { event, count };
            pathological
                .entry(event.signature())
                .and_modify(|existing: &mut Occurrence<'e>| {
                    if count > existing.count {
                        *existing = occurrence;
                    }
                })
                .or_insert(occurrence);
        }

        pathological
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowance::{AllowanceRule, AllowanceSpec, PatternRule};
    use crate::event::{
        ANNOTATION_CONSTRUCTED, ANNOTATION_COUNT, ANNOTATION_PHASE, ANNOTATION_ROLES,
        CONSTRUCTION_OWNER_NODE_LIFECYCLE, CONSTRUCTION_OWNER_POD_LIFECYCLE, LocatorKey,
        LocatorKind, REASON_CONTAINER_READY, REASON_FAILED_SCHEDULING,
        REASON_GRACEFUL_DELETE_STARTED, REASON_TOPOLOGY_HINTS_DISABLED, Source, kube_event,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const THRESHOLD: i64 = 20;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn backoff(count: i64, from: i64, to: i64) -> Event {
        kube_event(
            "openshift-ingress",
            "router-1",
            "BackOff",
            "Back-off restarting failed container",
            count,
            ts(from),
            ts(to),
        )
        .unwrap()
    }

    fn run(events: &[Event], allowances: &AllowanceSet) -> Vec<(String, i64, DateTime<Utc>)> {
        let refs: Vec<&Event> = events.iter().collect();
        let windows = ExemptionWindows::build(&refs);
        let context = ClusterContext::default();
        DuplicateDetector::new(THRESHOLD, allowances, &context)
            .detect(&refs, &windows)
            .into_iter()
            .map(|(sig, occ)| (sig, occ.count.value(), occ.event.from))
            .collect()
    }

    #[test]
    fn counts_at_or_below_threshold_are_ignored() {
        let events = vec![backoff(20, 0, 1), backoff(1, 2, 3)];
        assert!(run(&events, &AllowanceSet::default()).is_empty());
    }

    #[test]
    fn missing_count_means_once() {
        let mut event = backoff(50, 0, 1);
        event.message.annotations.remove(ANNOTATION_COUNT);
        assert!(run(&[event], &AllowanceSet::default()).is_empty());
    }

    #[test]
    fn unparsable_count_is_never_pathological() {
        let mut event = backoff(50, 0, 1);
        event
            .message
            .annotations
            .insert(ANNOTATION_COUNT.to_string(), "fifty".to_string());
        assert!(run(&[event], &AllowanceSet::default()).is_empty());
    }

    #[test]
    fn keeps_highest_count_per_signature() {
        let events = vec![backoff(25, 0, 1), backoff(40, 5, 6), backoff(30, 8, 9)];
        let found = run(&events, &AllowanceSet::default());
        assert_eq!(found.len(), 1);
        let (signature, count, from) = &found[0];
        assert_eq!(
            signature,
            "ns/openshift-ingress pod/router-1 - reason/BackOff Back-off restarting failed container"
        );
        assert_eq!(*count, 40);
        assert_eq!(*from, ts(5));
    }

    #[test]
    fn ties_keep_first_occurrence() {
        let events = vec![backoff(25, 0, 1), backoff(25, 5, 6)];
        let found = run(&events, &AllowanceSet::default());
        assert_eq!(found[0].2, ts(0));
    }

    #[test]
    fn distinct_signatures_are_sorted() {
        let events = vec![
            kube_event("ns-b", "p", "BackOff", "x", 30, ts(0), ts(1)).unwrap(),
            kube_event("ns-a", "p", "BackOff", "x", 30, ts(0), ts(1)).unwrap(),
        ];
        let found = run(&events, &AllowanceSet::default());
        let signatures: Vec<&str> = found.iter().map(|(s, _, _)| s.as_str()).collect();
        assert_eq!(
            signatures,
            vec![
                "ns/ns-a pod/p - reason/BackOff x",
                "ns/ns-b pod/p - reason/BackOff x"
            ]
        );
    }

    #[test]
    fn allowed_events_are_dropped() {
        let rule = PatternRule::compile(&AllowanceSpec {
            id: "router-backoff".to_string(),
            reason: Some("^BackOff$".to_string()),
            ..AllowanceSpec::default()
        })
        .unwrap();
        let allowances = AllowanceSet::new(vec![AllowanceRule::Pattern(rule)]);
        assert!(run(&[backoff(100, 0, 1)], &allowances).is_empty());
    }

    #[test]
    fn failed_scheduling_during_master_update_is_skipped_at_any_count() {
        let update = Event::builder(Source::NodeState, LocatorKind::Node)
            .node("master-0")
            .annotation(ANNOTATION_CONSTRUCTED, CONSTRUCTION_OWNER_NODE_LIFECYCLE)
            .annotation(ANNOTATION_PHASE, "Update")
            .annotation(ANNOTATION_ROLES, "master")
            .span(ts(0), ts(60))
            .build()
            .unwrap();
        let scheduling = kube_event(
            "openshift-monitoring",
            "prometheus-k8s-0",
            REASON_FAILED_SCHEDULING,
            "0/6 nodes are available",
            1_000_000,
            ts(10),
            ts(20),
        )
        .unwrap();
        let after = kube_event(
            "openshift-monitoring",
            "prometheus-k8s-0",
            REASON_FAILED_SCHEDULING,
            "0/6 nodes are available",
            30,
            ts(70),
            ts(80),
        )
        .unwrap();

        let found = run(&[update, scheduling, after], &AllowanceSet::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, 30);
    }

    #[test]
    fn topology_hints_inside_widened_taint_window_are_skipped() {
        let taint_test = Event::builder(Source::E2eTest, LocatorKind::E2eTest)
            .key(
                LocatorKey::E2eTest,
                "[sig-node] NoExecuteTaintManager Single Pod evicts pods",
            )
            .span(ts(0), ts(10))
            .build()
            .unwrap();
        let dns = |kind: LocatorKind, reason: &str, at: i64| {
            Event::builder(Source::PodState, kind)
                .namespace("openshift-dns")
                .pod("dns-default-abc")
                .container("dns")
                .reason(reason)
                .annotation(ANNOTATION_CONSTRUCTED, CONSTRUCTION_OWNER_POD_LIFECYCLE)
                .span(ts(at), ts(at))
                .build()
                .unwrap()
        };
        let hints = |count: i64, from: i64, to: i64| {
            kube_event(
                "openshift-dns",
                "dns-default",
                REASON_TOPOLOGY_HINTS_DISABLED,
                "Skipping topology aware endpointslice generation",
                count,
                ts(from),
                ts(to),
            )
            .unwrap()
        };

        let events = vec![
            taint_test,
            dns(LocatorKind::Pod, REASON_GRACEFUL_DELETE_STARTED, 5),
            dns(LocatorKind::Container, REASON_CONTAINER_READY, 14),
            dns(LocatorKind::Pod, "Created", 16),
            // past the test end, still inside the window widened to 09:14
            hints(1_000, 2, 13),
            hints(30, 20, 21),
        ];

        let found = run(&events, &AllowanceSet::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, 30);
        assert_eq!(found[0].2, ts(20));
    }
}
