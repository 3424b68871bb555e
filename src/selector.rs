//! Instance selection: the termination decision engine
//!
//! One `select` pass walks the full inventory (all pages), applies the age
//! rule, then the utilization rule, and produces the candidate set plus a
//! per-instance diagnostic trail. Nothing here mutates cloud state; the
//! Executor acts on the report afterwards.
//!
//! ## Decision Rules
//!
//! An instance is a termination candidate only when ALL of these hold:
//! - lifecycle state is `running`
//! - its `Environment` tag matches the configured value
//! - `now - launch_time >= age_threshold`
//! - the metrics provider returned at least one sample over the lookback
//!   window
//! - the arithmetic mean of the samples is strictly below the CPU
//!   threshold (mean == threshold counts as active)
//!
//! Instances below the age threshold are never queried for metrics. Zero
//! samples, a provider error, or a timed-out metrics call all resolve to
//! "no data, keep" — absence of evidence is never treated as idleness.

use crate::config::Policy;
use crate::error::{ReapError, Result};
use crate::provider::{
    Instance, InstanceId, InstanceState, InventoryProvider, MetricsProvider, UtilizationSample,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Tag key that scopes a run to one environment
pub const ENVIRONMENT_TAG_KEY: &str = "Environment";

/// Why an instance was kept or marked for termination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EvalReason {
    /// Launched after the cutoff; metrics were never queried
    TooYoung,
    /// No utilization samples available (none returned, provider error,
    /// or deadline exceeded)
    NoData,
    /// Mean CPU at or above the threshold
    Active { mean_cpu: f64 },
    /// Mean CPU below the threshold; marked for termination
    Idle { mean_cpu: f64 },
}

impl EvalReason {
    pub fn is_terminate(&self) -> bool {
        matches!(self, EvalReason::Idle { .. })
    }
}

/// One instance's evaluation
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub instance_id: InstanceId,
    pub launch_time: DateTime<Utc>,
    pub reason: EvalReason,
}

/// Result of one selection pass
#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    /// Identifiers to terminate, in inventory discovery order
    pub candidates: Vec<InstanceId>,
    /// Every evaluated instance, same order
    pub evaluations: Vec<Evaluation>,
}

/// Arithmetic mean of sample averages; `None` for an empty series
pub fn mean_utilization(samples: &[UtilizationSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().map(|s| s.average).sum();
    Some(sum / samples.len() as f64)
}

/// Classify a metric series against the policy threshold
///
/// The boundary is exclusive: mean == threshold is Active.
pub fn classify_utilization(policy: &Policy, samples: &[UtilizationSample]) -> EvalReason {
    match mean_utilization(samples) {
        None => EvalReason::NoData,
        Some(mean) if mean < policy.cpu_threshold_percent => EvalReason::Idle { mean_cpu: mean },
        Some(mean) => EvalReason::Active { mean_cpu: mean },
    }
}

pub struct Selector<'a> {
    inventory: &'a dyn InventoryProvider,
    metrics: &'a dyn MetricsProvider,
    policy: &'a Policy,
}

impl<'a> Selector<'a> {
    pub fn new(
        inventory: &'a dyn InventoryProvider,
        metrics: &'a dyn MetricsProvider,
        policy: &'a Policy,
    ) -> Self {
        Self {
            inventory,
            metrics,
            policy,
        }
    }

    /// Run one selection pass at the given instant
    ///
    /// `now` is captured once by the caller so repeated calls with the same
    /// instant and provider responses are reproducible.
    pub async fn select(&self, now: DateTime<Utc>) -> Result<SelectionReport> {
        let instances = self.fetch_inventory().await?;
        info!(
            "Evaluating {} running {} instance(s)",
            instances.len(),
            self.policy.environment_tag
        );

        let cutoff = now - self.policy.age_threshold;
        let window_start = now - self.policy.sampling_window();

        // Metric fetches are independent; run them on a bounded pool.
        // `buffered` preserves inventory order, so the report and the
        // candidate set stay deterministic.
        let results: Vec<(Evaluation, bool)> = stream::iter(instances)
            .map(|instance| async move {
                self.evaluate_instance(instance, cutoff, window_start, now)
                    .await
            })
            .buffered(self.policy.metric_concurrency)
            .collect()
            .await;

        let metrics_attempted = results
            .iter()
            .filter(|(eval, _)| eval.reason != EvalReason::TooYoung)
            .count();
        let metrics_failed = results.iter().filter(|(_, failed)| *failed).count();

        // A dead metrics provider must not masquerade as "nothing is idle".
        if metrics_attempted > 0 && metrics_failed == metrics_attempted {
            return Err(ReapError::ProviderUnavailable {
                provider: "metrics".to_string(),
                message: format!(
                    "all {} utilization queries failed; aborting run",
                    metrics_attempted
                ),
                source: None,
            });
        }

        let evaluations: Vec<Evaluation> = results.into_iter().map(|(eval, _)| eval).collect();
        let candidates = evaluations
            .iter()
            .filter(|e| e.reason.is_terminate())
            .map(|e| e.instance_id.clone())
            .collect();

        Ok(SelectionReport {
            candidates,
            evaluations,
        })
    }

    /// Consume every inventory page into one deduplicated sequence
    async fn fetch_inventory(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut seen: HashSet<InstanceId> = HashSet::new();
        let mut page_token = None;

        loop {
            let page = self
                .inventory
                .list_running_instances(
                    ENVIRONMENT_TAG_KEY,
                    &self.policy.environment_tag,
                    page_token,
                )
                .await?;

            for instance in page.instances {
                // Re-check the filter client-side; not every provider
                // filters server-side, and a pagination anomaly must not
                // double-count an instance.
                if instance.state != InstanceState::Running {
                    continue;
                }
                if instance.tag(ENVIRONMENT_TAG_KEY) != Some(self.policy.environment_tag.as_str()) {
                    continue;
                }
                if seen.insert(instance.id.clone()) {
                    instances.push(instance);
                }
            }

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(instances)
    }

    /// Evaluate one instance; the bool flags a metrics provider failure
    async fn evaluate_instance(
        &self,
        instance: Instance,
        cutoff: DateTime<Utc>,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Evaluation, bool) {
        if instance.launch_time > cutoff {
            debug!("Instance {} is recently launched, skipping", instance.id);
            return (
                Evaluation {
                    instance_id: instance.id,
                    launch_time: instance.launch_time,
                    reason: EvalReason::TooYoung,
                },
                false,
            );
        }

        let fetch = self.metrics.get_utilization(
            &instance.id,
            window_start,
            now,
            self.policy.sample_period,
        );

        let (reason, provider_failed) =
            match tokio::time::timeout(self.policy.provider_timeout, fetch).await {
                Ok(Ok(samples)) => (classify_utilization(self.policy, &samples), false),
                Ok(Err(e)) => {
                    warn!(
                        "Utilization query failed for {}, treating as no data: {}",
                        instance.id, e
                    );
                    (EvalReason::NoData, true)
                }
                Err(_) => {
                    warn!(
                        "Utilization query for {} exceeded {:?}, treating as no data",
                        instance.id, self.policy.provider_timeout
                    );
                    (EvalReason::NoData, true)
                }
            };

        match &reason {
            EvalReason::Idle { mean_cpu } => {
                info!(
                    "Instance {} is IDLE (avg CPU {:.2}%), marking for termination",
                    instance.id, mean_cpu
                );
            }
            EvalReason::Active { mean_cpu } => {
                info!(
                    "Instance {} is ACTIVE (avg CPU {:.2}%), keeping it",
                    instance.id, mean_cpu
                );
            }
            EvalReason::NoData => {
                info!("No CPU data for {}, skipping", instance.id);
            }
            EvalReason::TooYoung => {}
        }

        (
            Evaluation {
                instance_id: instance.id,
                launch_time: instance.launch_time,
                reason,
            },
            provider_failed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::TimeZone;

    fn policy() -> Policy {
        Policy::from_config(&Config::default().policy).unwrap()
    }

    fn sample(average: f64) -> UtilizationSample {
        UtilizationSample {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            average,
        }
    }

    #[test]
    fn test_mean_of_empty_series_is_none() {
        assert_eq!(mean_utilization(&[]), None);
    }

    #[test]
    fn test_mean_is_arithmetic() {
        let samples = vec![sample(10.0), sample(0.0)];
        assert_eq!(mean_utilization(&samples), Some(5.0));
    }

    #[test]
    fn test_classify_no_samples_is_no_data() {
        assert_eq!(classify_utilization(&policy(), &[]), EvalReason::NoData);
    }

    #[test]
    fn test_classify_below_threshold_is_idle() {
        let reason = classify_utilization(&policy(), &[sample(2.0)]);
        assert_eq!(reason, EvalReason::Idle { mean_cpu: 2.0 });
        assert!(reason.is_terminate());
    }

    #[test]
    fn test_classify_boundary_is_active() {
        // mean exactly at the threshold is not idle
        let reason = classify_utilization(&policy(), &[sample(10.0), sample(0.0)]);
        assert_eq!(reason, EvalReason::Active { mean_cpu: 5.0 });
        assert!(!reason.is_terminate());
    }

    #[test]
    fn test_classify_above_threshold_is_active() {
        let reason = classify_utilization(&policy(), &[sample(60.0)]);
        assert!(matches!(reason, EvalReason::Active { .. }));
    }
}
