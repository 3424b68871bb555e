//! Batch termination of selected instances
//!
//! The Executor receives the finalized candidate set and issues exactly
//! one batch terminate call. It never re-evaluates policy; that is the
//! Selector's job. An empty candidate set returns immediately without
//! touching the provider.
//!
//! Idempotent from the caller's perspective: an identifier that is already
//! terminating or gone comes back as `Terminated` (the desired state is
//! achieved), never as a failure. A total batch failure surfaces as an
//! error with nothing assumed terminated, which is distinct from per-id
//! failures inside an accepted batch.

use crate::error::Result;
use crate::provider::{
    HookOutcome, InstanceId, PreTerminationHook, TerminationOutcome, TerminationSink,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// Per-instance outcomes of one termination pass, in candidate order
#[derive(Debug, Clone, Default)]
pub struct TerminationReport {
    pub outcomes: Vec<(InstanceId, TerminationOutcome)>,
}

impl TerminationReport {
    pub fn terminated_ids(&self) -> Vec<InstanceId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == TerminationOutcome::Terminated)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<(InstanceId, String)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                TerminationOutcome::Failed(reason) => Some((id.clone(), reason.clone())),
                TerminationOutcome::Terminated => None,
            })
            .collect()
    }
}

pub struct Executor<'a> {
    sink: &'a dyn TerminationSink,
    hook: &'a dyn PreTerminationHook,
}

impl<'a> Executor<'a> {
    pub fn new(sink: &'a dyn TerminationSink, hook: &'a dyn PreTerminationHook) -> Self {
        Self { sink, hook }
    }

    /// Terminate the candidate set in one batch call
    pub async fn terminate(&self, candidates: &[InstanceId]) -> Result<TerminationReport> {
        if candidates.is_empty() {
            info!("No idle instances found for termination");
            return Ok(TerminationReport::default());
        }

        // Hook pass: a veto excludes the instance from the batch and is
        // reported as a per-instance failure, not a run failure.
        let mut vetoed: HashMap<InstanceId, String> = HashMap::new();
        let mut batch: Vec<InstanceId> = Vec::new();
        for id in candidates {
            match self.hook.before_terminate(id).await {
                HookOutcome::Proceed => batch.push(id.clone()),
                HookOutcome::Veto(reason) => {
                    warn!("Pre-termination hook vetoed {}: {}", id, reason);
                    vetoed.insert(id.clone(), reason);
                }
            }
        }

        let mut reported: HashMap<InstanceId, TerminationOutcome> = HashMap::new();
        if !batch.is_empty() {
            info!("Terminating instances: {:?}", batch);
            for (id, outcome) in self.sink.terminate(&batch).await? {
                reported.insert(id, outcome);
            }
        }

        // Reassemble in candidate order so reports stay deterministic.
        let outcomes = candidates
            .iter()
            .map(|id| {
                if let Some(reason) = vetoed.remove(id) {
                    return (id.clone(), TerminationOutcome::Failed(reason));
                }
                let outcome = reported.remove(id).unwrap_or_else(|| {
                    TerminationOutcome::Failed("no outcome reported by provider".to_string())
                });
                (id.clone(), outcome)
            })
            .collect();

        let report = TerminationReport { outcomes };
        for (id, reason) in report.failures() {
            warn!("Failed to terminate {}: {}", id, reason);
        }
        Ok(report)
    }
}
