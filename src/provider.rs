//! Collaborator traits for the cloud provider surface
//!
//! The decision engine never talks to a cloud SDK directly. It consumes
//! three capability traits: an inventory provider (lists instances with
//! metadata), a metrics provider (returns utilization samples over a time
//! window), and a termination sink (issues the batch terminate call).
//! Concrete AWS bindings live in `aws.rs`; tests substitute in-memory
//! doubles.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Instance identifier (e.g. "i-0abc123")
pub type InstanceId = String;

/// Snapshot of a compute instance as reported by the inventory provider
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub launch_time: DateTime<Utc>,
    pub state: InstanceState,
    pub tags: Vec<(String, String)>,
}

impl Instance {
    /// Look up a tag value by key
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Instance lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Running,
    Starting,
    Stopped,
    Terminating,
    Terminated,
    Unknown,
}

/// Helper to convert provider-specific state strings to InstanceState
pub fn normalize_state(state_str: &str) -> InstanceState {
    match state_str.to_lowercase().as_str() {
        "running" | "active" => InstanceState::Running,
        "pending" | "starting" | "initializing" => InstanceState::Starting,
        "stopping" | "stopped" => InstanceState::Stopped,
        "terminating" | "shutting-down" => InstanceState::Terminating,
        "terminated" => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

/// One timestamp-bucketed average CPU percentage
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

/// One page of inventory results
///
/// `next_token` is `None` on the last page. Providers that do not paginate
/// return everything in a single page.
#[derive(Debug, Clone, Default)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    pub next_token: Option<String>,
}

/// Lists running instances matching a tag filter
///
/// The filter is applied server-side where the provider supports it; an
/// implementation without server-side filtering must filter client-side so
/// callers only ever see running instances carrying the requested tag.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn list_running_instances(
        &self,
        tag_key: &str,
        tag_value: &str,
        page_token: Option<String>,
    ) -> Result<InstancePage>;
}

/// Returns utilization samples for one instance over a time window
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn get_utilization(
        &self,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Duration,
    ) -> Result<Vec<UtilizationSample>>;
}

/// Per-instance result of a batch termination request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationOutcome {
    /// The instance is terminating, already terminated, or no longer exists.
    /// All three mean the desired state is achieved.
    Terminated,
    Failed(String),
}

/// Issues the batch terminate call
///
/// `Err` means the batch call itself failed and nothing can be assumed
/// terminated. Per-instance failures inside an accepted batch come back as
/// `TerminationOutcome::Failed` entries.
#[async_trait]
pub trait TerminationSink: Send + Sync {
    async fn terminate(
        &self,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<(InstanceId, TerminationOutcome)>>;
}

/// Decision returned by a pre-termination hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Proceed,
    /// Exclude the instance from the batch, with a reason
    Veto(String),
}

/// Hook invoked for each candidate before the batch is assembled
///
/// Extension point for pre-termination work such as AMI backup or owner
/// notification. A veto keeps the instance out of the terminate call and
/// is reported as a per-instance failure. The original scripts sketched
/// backup and email steps here but never implemented them; the default
/// hook approves everything.
#[async_trait]
pub trait PreTerminationHook: Send + Sync {
    async fn before_terminate(&self, instance_id: &str) -> HookOutcome;
}

/// Default hook: approves every termination
pub struct NoopHook;

#[async_trait]
impl PreTerminationHook for NoopHook {
    async fn before_terminate(&self, _instance_id: &str) -> HookOutcome {
        HookOutcome::Proceed
    }
}
