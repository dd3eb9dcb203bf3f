use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::config::CascadeConfig;

/// Failure recorded for items never started because the deadline had passed
pub const DEADLINE_EXCEEDED: &str = "cascade deadline exceeded";

/// Bounds for a batch of independent remote calls
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Calls in flight at once
    pub concurrency: usize,
    pub call_timeout: Duration,
    /// Budget for a whole cascade, however many batches it runs
    pub deadline: Duration,
}

impl FanoutConfig {
    /// Deadline for a cascade starting now
    pub fn deadline_from_now(&self) -> Instant {
        Instant::now() + self.deadline
    }
}

impl From<&CascadeConfig> for FanoutConfig {
    fn from(config: &CascadeConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            call_timeout: config.call_timeout(),
            deadline: config.deadline(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutReport<K> {
    pub succeeded: Vec<K>,
    pub failed: Vec<(K, String)>,
}

impl<K> FanoutReport<K> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// True when there was work and none of it succeeded
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.succeeded.is_empty()
    }

    pub fn failure_messages(&self) -> Vec<String>
    where
        K: Display,
    {
        self.failed.iter().map(|(k, e)| format!("{}: {}", k, e)).collect()
    }
}

/// Run `op` over every item with at most `concurrency` in flight.
///
/// Each call is bounded by the per-call timeout and by what remains until
/// `deadline`. Items reached after the deadline are failed without being
/// started. A failure never stops the rest of the batch.
pub async fn fan_out<K, I, F, Fut, E>(items: I, config: &FanoutConfig, deadline: Instant, op: F) -> FanoutReport<K>
where
    I: IntoIterator<Item = K>,
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let op = &op;

    let results: Vec<(K, Result<(), String>)> = stream::iter(items)
        .map(|item| async move {
            let now = Instant::now();
            if now >= deadline {
                return (item, Err(DEADLINE_EXCEEDED.to_string()));
            }

            let budget = config.call_timeout.min(deadline - now);
            let outcome = match timeout(budget, op(item.clone())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err(format!("timed out after {}ms", budget.as_millis())),
            };
            (item, outcome)
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    let mut report = FanoutReport {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for (item, outcome) in results {
        match outcome {
            Ok(()) => report.succeeded.push(item),
            Err(err) => report.failed.push((item, err)),
        }
    }
    debug!(total = report.total(), failed = report.failed.len(), "fan-out batch finished");
    report
}
