use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::{ObjectLocation, ObjectStorage};
use tracing::info;

use crate::{
    config::RelayConfig,
    deadline::DeadlineWatcher,
    event::NotificationEvent,
    task::{TaskOutcome, TransferParams, TransferTask},
};

const DEADLINE_REASON: &str = "invocation time budget exhausted";

/// Aggregate result of one invocation: outcomes in event order, an overall
/// status, and one human-readable line per task plus a summary line.
#[derive(Debug)]
pub struct BatchSummary {
    pub outcomes: Vec<TaskOutcome>,
    pub success: bool,
    pub messages: Vec<String>,
}

impl BatchSummary {
    fn from_outcomes(outcomes: Vec<TaskOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let failed = outcomes.len() - succeeded;
        let success = failed == 0;

        let mut messages: Vec<String> = outcomes.iter().map(outcome_line).collect();
        messages.push(format!(
            "{}: {} object(s), {} succeeded, {} failed",
            if success { "success" } else { "fail" },
            outcomes.len(),
            succeeded,
            failed,
        ));

        Self {
            outcomes,
            success,
            messages,
        }
    }

    pub fn message(&self) -> String {
        self.messages.join("\n")
    }

    /// The process contract: the flattened summary comes back as a value on
    /// success and as an error on aggregate failure, never a raw exception.
    pub fn into_result(self) -> Result<String> {
        let message = self.message();
        if self.success {
            Ok(message)
        } else {
            Err(anyhow!(message))
        }
    }
}

fn outcome_line(outcome: &TaskOutcome) -> String {
    match &outcome.result {
        Ok(result) => format!(
            "[success] {} -> {} ({} bytes)",
            outcome.params.source, outcome.params.destination, result.size_bytes
        ),
        Err(error) => format!("[fail] {}: {}", outcome.params.source, error),
    }
}

/// Turns one notification event into a sequence of transfer tasks, runs
/// them one at a time under the deadline watcher, and aggregates outcomes.
pub struct BatchRunner {
    config: RelayConfig,
    storage: Arc<dyn ObjectStorage>,
}

impl BatchRunner {
    pub fn new(config: RelayConfig, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { config, storage }
    }

    pub async fn run(&self, event: &NotificationEvent) -> Result<BatchSummary> {
        // Malformed records are fatal before any task is constructed.
        let sources = event.source_locations()?;
        info!(objects = sources.len(), "starting batch");

        let watcher = DeadlineWatcher::new(
            Duration::from_millis(self.config.time_budget_ms),
            DEADLINE_REASON,
        );
        let summary = self.run_all(sources, &watcher).await;
        watcher.clear();

        info!(
            objects = summary.outcomes.len(),
            success = summary.success,
            "batch complete"
        );
        Ok(summary)
    }

    async fn run_all(
        &self,
        sources: Vec<ObjectLocation>,
        watcher: &DeadlineWatcher,
    ) -> BatchSummary {
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            let params = TransferParams::new(
                source,
                &self.config.target_bucket,
                &self.config.target_region,
                &self.config.target_prefix,
                self.config.max_attempts,
            );
            let task = TransferTask::new(params, self.storage.clone());
            let handle = task.cancel_handle();

            // A task starting after the deadline is canceled up front; it
            // observes that at its first retry-loop check and fails fast.
            if watcher.is_timeout() {
                handle.cancel(Some(watcher.reason().to_string()));
            } else {
                watcher.bind(handle);
            }
            let outcome = task.run().await;
            watcher.unbind();

            // One task failing never aborts the rest of the batch.
            outcomes.push(outcome);
        }
        BatchSummary::from_outcomes(outcomes)
    }
}
