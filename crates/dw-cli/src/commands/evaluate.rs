//! Evaluate a monitor timeline and emit verdicts.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dw_cluster::{Client, fetch_context_or_default};
use dw_core::{
    AllowanceRule, AllowanceSet, ClusterContext, Evaluator, JobKind, Timeline, Verdict, compile_specs,
};
use serde::Serialize;

use crate::Config;

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Timeline file: a JSON array of events or one event per line.
    pub timeline: PathBuf,

    /// The job upgraded the cluster; also apply upgrade-only allowances.
    #[arg(long)]
    pub upgrade: bool,

    /// Do not contact the cluster API server.
    #[arg(long)]
    pub offline: bool,
}

/// Output record for one verdict.
#[derive(Debug, Serialize)]
struct VerdictLine<'a> {
    name: &'a str,
    passed: bool,
    failure_output: Option<&'a str>,
}

impl<'a> From<&'a Verdict> for VerdictLine<'a> {
    fn from(verdict: &'a Verdict) -> Self {
        Self {
            name: &verdict.name,
            passed: verdict.passed(),
            failure_output: verdict.failure_output.as_deref(),
        }
    }
}

pub fn run<W: Write>(writer: &mut W, args: &EvaluateArgs, config: &Config) -> Result<()> {
    let timeline = Timeline::load(&args.timeline)
        .with_context(|| format!("failed to load timeline {}", args.timeline.display()))?;

    let job = if args.upgrade {
        JobKind::Upgrade
    } else {
        JobKind::Stable
    };
    let mut rules = compile_specs(&config.allowances, job).context("invalid allowance configuration")?;

    let client = if args.offline {
        None
    } else {
        config
            .cluster_client()
            .context("invalid cluster configuration")?
    };
    let (context, etcd_revision) = match &client {
        Some(client) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
            runtime.block_on(fetch_cluster_facts(client, config.etcd_revision_allowance))
        }
        None => (ClusterContext::default(), Some(0)),
    };

    if let Some(revision) = etcd_revision.filter(|_| config.etcd_revision_allowance) {
        tracing::debug!(revision, "enabling etcd guard revision allowance");
        rules.push(AllowanceRule::etcd_guard_revision_budget(revision));
    }

    let allowances = AllowanceSet::new(rules);
    tracing::debug!(rules = ?allowances.ids().collect::<Vec<_>>(), "built allowance set");
    let evaluator = Evaluator::new(config.evaluator_config(), allowances, context);
    let verdicts = evaluator.evaluate(&timeline);
    tracing::info!(
        events = timeline.len(),
        verdicts = verdicts.len(),
        failed = verdicts.iter().filter(|v| !v.passed()).count(),
        "evaluated timeline"
    );

    for verdict in &verdicts {
        writeln!(writer, "{}", serde_json::to_string(&VerdictLine::from(verdict))?)?;
    }
    Ok(())
}

/// Fetches the cluster context and, when wanted, the etcd revision.
///
/// A failed revision fetch leaves the revision allowance out rather than
/// failing the run.
async fn fetch_cluster_facts(client: &Client, want_revision: bool) -> (ClusterContext, Option<i64>) {
    let context = fetch_context_or_default(client).await;
    if !want_revision {
        return (context, None);
    }
    match client.etcd_revision().await {
        Ok(revision) => (context, Some(revision)),
        Err(err) => {
            tracing::warn!(error = %err, "could not fetch etcd revision, skipping revision allowance");
            (context, None)
        }
    }
}
