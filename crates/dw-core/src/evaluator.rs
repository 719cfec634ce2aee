//! Running the standard pathological event checks over a timeline.

use std::collections::BTreeSet;

use crate::allowance::AllowanceSet;
use crate::context::ClusterContext;
use crate::detector::DuplicateDetector;
use crate::event::Event;
use crate::timeline::Timeline;
use crate::verdict::{Mode, Verdict, aggregate};
use crate::window::ExemptionWindows;

/// Name of the check over platform (non-e2e) namespaces.
pub const CORE_TEST_NAME: &str = "[sig-arch] events should not repeat pathologically";
/// Name of the check over e2e namespaces.
pub const E2E_TEST_NAME: &str = "[sig-arch] events should not repeat pathologically in e2e namespaces";

/// Repeat counts above this are pathological.
pub const DEFAULT_THRESHOLD: i64 = 20;

/// Platform namespaces that get a verdict of their own.
pub const DEFAULT_KNOWN_NAMESPACES: &[&str] = &[
    "default",
    "kube-system",
    "openshift-apiserver",
    "openshift-apiserver-operator",
    "openshift-authentication",
    "openshift-authentication-operator",
    "openshift-cloud-controller-manager",
    "openshift-cloud-controller-manager-operator",
    "openshift-cloud-credential-operator",
    "openshift-cluster-csi-drivers",
    "openshift-cluster-machine-approver",
    "openshift-cluster-node-tuning-operator",
    "openshift-cluster-samples-operator",
    "openshift-cluster-storage-operator",
    "openshift-cluster-version",
    "openshift-config-operator",
    "openshift-console",
    "openshift-console-operator",
    "openshift-controller-manager",
    "openshift-controller-manager-operator",
    "openshift-dns",
    "openshift-dns-operator",
    "openshift-etcd",
    "openshift-etcd-operator",
    "openshift-image-registry",
    "openshift-ingress",
    "openshift-ingress-canary",
    "openshift-ingress-operator",
    "openshift-insights",
    "openshift-kube-apiserver",
    "openshift-kube-apiserver-operator",
    "openshift-kube-controller-manager",
    "openshift-kube-controller-manager-operator",
    "openshift-kube-scheduler",
    "openshift-kube-scheduler-operator",
    "openshift-kube-storage-version-migrator",
    "openshift-kube-storage-version-migrator-operator",
    "openshift-machine-api",
    "openshift-machine-config-operator",
    "openshift-marketplace",
    "openshift-monitoring",
    "openshift-multus",
    "openshift-network-diagnostics",
    "openshift-network-operator",
    "openshift-oauth-apiserver",
    "openshift-operator-lifecycle-manager",
    "openshift-ovn-kubernetes",
    "openshift-sdn",
    "openshift-service-ca",
    "openshift-service-ca-operator",
];

/// Configuration for an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Repeat counts above this are pathological.
    pub threshold: i64,
    /// Namespaces reported separately in core mode.
    pub known_namespaces: BTreeSet<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            known_namespaces: DEFAULT_KNOWN_NAMESPACES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Evaluates timelines against a fixed allowance set and cluster context.
///
/// Each call to [`Evaluator::evaluate`] owns its own windows and detector
/// state, so one evaluator can be reused across timelines.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluatorConfig,
    allowances: AllowanceSet,
    context: ClusterContext,
}

impl Evaluator {
    pub const fn new(config: EvaluatorConfig, allowances: AllowanceSet, context: ClusterContext) -> Self {
        Self {
            config,
            allowances,
            context,
        }
    }

    pub const fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub const fn context(&self) -> &ClusterContext {
        &self.context
    }

    /// Runs the core namespace check and then the e2e namespace check.
    pub fn evaluate(&self, timeline: &Timeline) -> Vec<Verdict> {
        let (core, e2e) = timeline.partition_e2e();
        tracing::debug!(
            core_events = core.len(),
            e2e_events = e2e.len(),
            context = %self.context,
            rules = self.allowances.len(),
            "evaluating timeline"
        );

        let mut verdicts = self.check(CORE_TEST_NAME, Mode::CoreNamespaces, &core);
        verdicts.extend(self.check(E2E_TEST_NAME, Mode::E2eNamespaces, &e2e));
        verdicts
    }

    /// Runs one check over an already scoped set of events.
    pub fn check(&self, test_name: &str, mode: Mode, events: &[&Event]) -> Vec<Verdict> {
        let windows = ExemptionWindows::build(events);
        let pathological = DuplicateDetector::new(self.config.threshold, &self.allowances, &self.context)
            .detect(events, &windows);
        tracing::info!(
            test = test_name,
            pathological = pathological.len(),
            "detected repeating events"
        );
        aggregate(test_name, mode, &self.config.known_namespaces, &pathological)
    }
}
