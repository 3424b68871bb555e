//! Shared test doubles for the collaborator traits
//!
//! In-memory fakes so selection and termination can be exercised without a
//! cloud account. Each fake records how it was called, which lets tests
//! assert properties like "too-young instances are never queried for
//! metrics" and "an empty candidate set issues no provider call".

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reapctl::error::{ReapError, Result};
use reapctl::provider::{
    HookOutcome, Instance, InstanceId, InstancePage, InstanceState, InventoryProvider,
    MetricsProvider, PreTerminationHook, TerminationOutcome, TerminationSink, UtilizationSample,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fixed evaluation instant shared by the tests
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
}

pub fn instance(id: &str, age_days: i64, now: DateTime<Utc>) -> Instance {
    Instance {
        id: id.to_string(),
        launch_time: now - Duration::days(age_days),
        state: InstanceState::Running,
        tags: vec![("Environment".to_string(), "Dev".to_string())],
    }
}

pub fn samples(averages: &[f64]) -> Vec<UtilizationSample> {
    averages
        .iter()
        .enumerate()
        .map(|(i, avg)| UtilizationSample {
            timestamp: fixed_now() - Duration::days(i as i64),
            average: *avg,
        })
        .collect()
}

/// Inventory fake serving a fixed sequence of pages
pub struct FakeInventory {
    pages: Vec<Vec<Instance>>,
    pub page_calls: AtomicUsize,
}

impl FakeInventory {
    pub fn single_page(instances: Vec<Instance>) -> Self {
        Self::paged(vec![instances])
    }

    pub fn paged(pages: Vec<Vec<Instance>>) -> Self {
        Self {
            pages,
            page_calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::single_page(Vec::new())
    }
}

#[async_trait]
impl InventoryProvider for FakeInventory {
    async fn list_running_instances(
        &self,
        _tag_key: &str,
        _tag_value: &str,
        page_token: Option<String>,
    ) -> Result<InstancePage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = match page_token {
            None => 0,
            Some(token) => token.parse().expect("fake token is a page index"),
        };
        let instances = self.pages.get(index).cloned().unwrap_or_default();
        let next_token = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(InstancePage {
            instances,
            next_token,
        })
    }
}

/// Metrics fake with per-instance series, failures, and optional delay
pub struct FakeMetrics {
    series: HashMap<InstanceId, Vec<UtilizationSample>>,
    failing: HashSet<InstanceId>,
    delays: HashMap<InstanceId, std::time::Duration>,
    pub queried: Mutex<Vec<InstanceId>>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            failing: HashSet::new(),
            delays: HashMap::new(),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn with_series(mut self, id: &str, averages: &[f64]) -> Self {
        self.series.insert(id.to_string(), samples(averages));
        self
    }

    pub fn with_failure(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    /// Delay queries for one instance; combined with a short policy
    /// timeout this simulates a hung provider
    pub fn with_delay_for(mut self, id: &str, delay: std::time::Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn queried_ids(&self) -> Vec<InstanceId> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsProvider for FakeMetrics {
    async fn get_utilization(
        &self,
        instance_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _period: Duration,
    ) -> Result<Vec<UtilizationSample>> {
        self.queried.lock().unwrap().push(instance_id.to_string());
        if let Some(delay) = self.delays.get(instance_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(instance_id) {
            return Err(ReapError::ProviderUnavailable {
                provider: "fake-metrics".to_string(),
                message: format!("simulated outage for {}", instance_id),
                source: None,
            });
        }
        Ok(self.series.get(instance_id).cloned().unwrap_or_default())
    }
}

/// How the fake sink responds to a batch
pub enum SinkBehavior {
    /// Every id terminates
    Success,
    /// Listed ids fail with the given reason, the rest terminate
    PartialFailure(HashMap<InstanceId, String>),
    /// The batch call itself errors
    TotalFailure,
    /// Every id was already terminated or missing; the provider maps that
    /// to success (desired state achieved)
    AlreadyGone,
}

pub struct FakeSink {
    behavior: SinkBehavior,
    pub batches: Mutex<Vec<Vec<InstanceId>>>,
}

impl FakeSink {
    pub fn new(behavior: SinkBehavior) -> Self {
        Self {
            behavior,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(SinkBehavior::Success)
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn last_batch(&self) -> Option<Vec<InstanceId>> {
        self.batches.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TerminationSink for FakeSink {
    async fn terminate(
        &self,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<(InstanceId, TerminationOutcome)>> {
        self.batches.lock().unwrap().push(instance_ids.to_vec());
        match &self.behavior {
            SinkBehavior::Success => Ok(instance_ids
                .iter()
                .map(|id| (id.clone(), TerminationOutcome::Terminated))
                .collect()),
            SinkBehavior::PartialFailure(failures) => Ok(instance_ids
                .iter()
                .map(|id| {
                    let outcome = match failures.get(id) {
                        Some(reason) => TerminationOutcome::Failed(reason.clone()),
                        None => TerminationOutcome::Terminated,
                    };
                    (id.clone(), outcome)
                })
                .collect()),
            SinkBehavior::TotalFailure => Err(ReapError::TerminationFailed {
                message: "simulated batch rejection".to_string(),
                source: None,
            }),
            SinkBehavior::AlreadyGone => Ok(instance_ids
                .iter()
                .map(|id| (id.clone(), TerminationOutcome::Terminated))
                .collect()),
        }
    }
}

/// Hook that vetoes a fixed set of ids
pub struct VetoHook {
    vetoed: HashSet<InstanceId>,
}

impl VetoHook {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            vetoed: ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PreTerminationHook for VetoHook {
    async fn before_terminate(&self, instance_id: &str) -> HookOutcome {
        if self.vetoed.contains(instance_id) {
            HookOutcome::Veto("backup hook declined".to_string())
        } else {
            HookOutcome::Proceed
        }
    }
}

/// Default policy (Dev, 5.0%, 7 days) built through the public config path
pub fn default_policy() -> reapctl::Policy {
    reapctl::Policy::from_config(&reapctl::Config::default().policy).unwrap()
}
