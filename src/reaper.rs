//! Run orchestration: one select-then-terminate pass
//!
//! The Selector runs to completion and finalizes the candidate list before
//! the Executor is invoked once with the whole batch. Nothing is
//! terminated until selection is done, so cancelling (dropping) a run
//! future mid-selection discards partial work without side effects. No
//! state survives between runs; each invocation re-evaluates the fleet
//! from scratch.

use crate::config::Policy;
use crate::error::Result;
use crate::executor::Executor;
use crate::provider::{
    InstanceId, InventoryProvider, MetricsProvider, PreTerminationHook, TerminationSink,
};
use crate::selector::{SelectionReport, Selector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Summary of one run, suitable for returning to a scheduler or printing
/// as JSON from the CLI
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Instances evaluated (after dedupe and filtering)
    pub checked_count: usize,
    /// Identifiers whose termination was accepted
    pub terminated_ids: Vec<InstanceId>,
    /// Per-instance termination failures, empty on a clean run
    pub failed: Vec<(InstanceId, String)>,
    pub status_code: u16,
}

/// The collaborator handles one run operates through
///
/// Bundled so the run signature stays stable as extension points grow.
/// Lifecycle is owned by the invocation, not the process; tests pass
/// in-memory doubles.
pub struct Collaborators<'a> {
    pub inventory: &'a dyn InventoryProvider,
    pub metrics: &'a dyn MetricsProvider,
    pub sink: &'a dyn TerminationSink,
    pub hook: &'a dyn PreTerminationHook,
}

/// Selection only: evaluate the fleet without terminating anything
pub async fn plan(
    policy: &Policy,
    collaborators: &Collaborators<'_>,
    now: DateTime<Utc>,
) -> Result<SelectionReport> {
    Selector::new(collaborators.inventory, collaborators.metrics, policy)
        .select(now)
        .await
}

/// One full pass at a fixed instant: select, then terminate the batch
pub async fn run_at(
    policy: &Policy,
    collaborators: &Collaborators<'_>,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    let report = plan(policy, collaborators, now).await?;

    let executor = Executor::new(collaborators.sink, collaborators.hook);
    let termination = executor.terminate(&report.candidates).await?;

    let summary = RunSummary {
        checked_count: report.evaluations.len(),
        terminated_ids: termination.terminated_ids(),
        failed: termination.failures(),
        status_code: 200,
    };
    info!(
        "Run complete: checked {}, terminated {}, failed {}",
        summary.checked_count,
        summary.terminated_ids.len(),
        summary.failed.len()
    );
    Ok(summary)
}

/// One full pass at the current time
pub async fn run(policy: &Policy, collaborators: &Collaborators<'_>) -> Result<RunSummary> {
    run_at(policy, collaborators, Utc::now()).await
}
