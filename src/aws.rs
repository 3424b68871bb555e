//! AWS bindings for the collaborator traits
//!
//! Thin adapters from EC2 and CloudWatch to the `provider` traits. No
//! policy lives here: these translate wire shapes, map SDK errors, and
//! apply the read-path retry policy. Everything decision-shaped stays in
//! the Selector.

use crate::error::{ReapError, Result};
use crate::provider::{
    normalize_state, Instance, InstanceId, InstancePage, InventoryProvider, MetricsProvider,
    TerminationOutcome, TerminationSink, UtilizationSample,
};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

const EC2_NAMESPACE: &str = "AWS/EC2";
const CPU_METRIC: &str = "CPUUtilization";

/// Error codes that mean the desired terminated state is already achieved
const ALREADY_GONE_CODES: &[&str] = &["InvalidInstanceID.NotFound", "IncorrectInstanceState"];

/// Shared SDK clients for one run
///
/// Built per invocation rather than held as process globals so test
/// doubles can stand in for the traits and so credentials resolve at run
/// time under an external scheduler.
pub struct AwsClients {
    ec2: Ec2Client,
    cloudwatch: CloudWatchClient,
}

impl AwsClients {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self {
            ec2: Ec2Client::new(&sdk_config),
            cloudwatch: CloudWatchClient::new(&sdk_config),
        }
    }

    pub fn inventory(&self) -> Ec2Inventory {
        Ec2Inventory {
            client: self.ec2.clone(),
        }
    }

    pub fn metrics(&self) -> CloudWatchMetrics {
        CloudWatchMetrics {
            client: self.cloudwatch.clone(),
        }
    }

    pub fn termination_sink(&self) -> Ec2TerminationSink {
        Ec2TerminationSink {
            client: self.ec2.clone(),
        }
    }
}

fn provider_unavailable(provider: &str, message: String) -> ReapError {
    ReapError::ProviderUnavailable {
        provider: provider.to_string(),
        message,
        source: None,
    }
}

/// EC2-backed inventory: describe_instances with server-side filters
pub struct Ec2Inventory {
    client: Ec2Client,
}

#[async_trait]
impl InventoryProvider for Ec2Inventory {
    async fn list_running_instances(
        &self,
        tag_key: &str,
        tag_value: &str,
        page_token: Option<String>,
    ) -> Result<InstancePage> {
        let state_filter = Filter::builder()
            .name("instance-state-name")
            .values("running")
            .build();
        let tag_filter = Filter::builder()
            .name(format!("tag:{}", tag_key))
            .values(tag_value)
            .build();

        let response = ExponentialBackoffPolicy::for_cloud_api()
            .execute_with_retry(|| {
                let state_filter = state_filter.clone();
                let tag_filter = tag_filter.clone();
                let page_token = page_token.clone();
                async move {
                    self.client
                        .describe_instances()
                        .filters(state_filter)
                        .filters(tag_filter)
                        .set_next_token(page_token)
                        .send()
                        .await
                        .map_err(|e| {
                            provider_unavailable(
                                "ec2",
                                format!("Failed to list instances: {}", e),
                            )
                        })
                }
            })
            .await?;

        let mut instances = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };
                let Some(launch_time) = instance
                    .launch_time()
                    .and_then(|lt| DateTime::<Utc>::from_timestamp(lt.secs(), 0))
                else {
                    warn!("Instance {} has no launch time, skipping", id);
                    continue;
                };
                let state = normalize_state(
                    instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|s| s.as_str())
                        .unwrap_or("unknown"),
                );
                let tags: Vec<(String, String)> = instance
                    .tags()
                    .iter()
                    .filter_map(|tag| {
                        tag.key()
                            .zip(tag.value())
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                    })
                    .collect();

                instances.push(Instance {
                    id: id.to_string(),
                    launch_time,
                    state,
                    tags,
                });
            }
        }

        debug!(
            "Fetched inventory page with {} instance(s), more: {}",
            instances.len(),
            response.next_token().is_some()
        );

        Ok(InstancePage {
            instances,
            next_token: response.next_token().map(|t| t.to_string()),
        })
    }
}

/// CloudWatch-backed metrics: CPUUtilization averages per period
pub struct CloudWatchMetrics {
    client: CloudWatchClient,
}

#[async_trait]
impl MetricsProvider for CloudWatchMetrics {
    async fn get_utilization(
        &self,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Duration,
    ) -> Result<Vec<UtilizationSample>> {
        let dimension = Dimension::builder()
            .name("InstanceId")
            .value(instance_id)
            .build();

        let response = ExponentialBackoffPolicy::for_cloud_api()
            .execute_with_retry(|| {
                let dimension = dimension.clone();
                async move {
                    self.client
                        .get_metric_statistics()
                        .namespace(EC2_NAMESPACE)
                        .metric_name(CPU_METRIC)
                        .dimensions(dimension)
                        .start_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(
                            start.timestamp(),
                        ))
                        .end_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(
                            end.timestamp(),
                        ))
                        .period(period.num_seconds() as i32)
                        .statistics(Statistic::Average)
                        .send()
                        .await
                        .map_err(|e| {
                            provider_unavailable(
                                "cloudwatch",
                                format!("Failed to fetch CPU metrics: {}", e),
                            )
                        })
                }
            })
            .await?;

        let samples = response
            .datapoints()
            .iter()
            .filter_map(|dp| {
                let average = dp.average()?;
                let timestamp = dp
                    .timestamp()
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), 0))?;
                Some(UtilizationSample { timestamp, average })
            })
            .collect();

        Ok(samples)
    }
}

/// EC2-backed termination sink: one terminate_instances batch call
///
/// EC2 reports per-instance state changes on an accepted batch, but the
/// whole call fails when any identifier is unknown. On that total failure
/// we fall back to per-id calls so one stale identifier cannot block the
/// rest of the batch; "not found" and "wrong state" map to success since
/// the instance is already where we want it.
pub struct Ec2TerminationSink {
    client: Ec2Client,
}

impl Ec2TerminationSink {
    async fn terminate_one(&self, id: &str) -> TerminationOutcome {
        let result = self
            .client
            .terminate_instances()
            .instance_ids(id)
            .send()
            .await;
        match result {
            Ok(_) => TerminationOutcome::Terminated,
            Err(e) if is_already_gone(&e) => TerminationOutcome::Terminated,
            Err(e) => TerminationOutcome::Failed(format!("{}", e)),
        }
    }
}

fn is_already_gone<E: ProvideErrorMetadata, R>(
    err: &aws_sdk_ec2::error::SdkError<E, R>,
) -> bool {
    err.code()
        .map(|code| ALREADY_GONE_CODES.contains(&code))
        .unwrap_or(false)
}

#[async_trait]
impl TerminationSink for Ec2TerminationSink {
    async fn terminate(
        &self,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<(InstanceId, TerminationOutcome)>> {
        // No automatic retry: terminating is destructive, one attempt only.
        let result = self
            .client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await;

        match result {
            Ok(response) => {
                let outcomes = response
                    .terminating_instances()
                    .iter()
                    .filter_map(|change| {
                        change
                            .instance_id()
                            .map(|id| (id.to_string(), TerminationOutcome::Terminated))
                    })
                    .collect();
                Ok(outcomes)
            }
            Err(e) if is_already_gone(&e) => {
                warn!(
                    "Batch rejected ({}), falling back to per-instance termination",
                    e.code().unwrap_or("unknown")
                );
                let mut outcomes = Vec::with_capacity(instance_ids.len());
                for id in instance_ids {
                    outcomes.push((id.clone(), self.terminate_one(id).await));
                }
                Ok(outcomes)
            }
            Err(e) => Err(ReapError::TerminationFailed {
                message: format!("terminate_instances batch call failed: {}", e),
                source: Some(Box::new(e)),
            }),
        }
    }
}
