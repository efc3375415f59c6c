//! Phase 1: runs specialists in staggered batches.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::catalogue::MechanicalProfile;
use crate::config::AnalysisOptions;
use crate::context::EngineContext;
use crate::error::{OrchestrationError, Result};
use crate::events::RunReporter;
use crate::feedback::{FeedbackItem, parse_feedback};
use crate::specialist::SpecialistTask;
use crate::tool_loop::ToolLoop;

/// Prefix of the mechanical pass's user turn.
pub const MECHANICAL_USER_PREFIX: &str = "Here is the text to check for grammar, spelling, and punctuation errors:\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Fulfilled,
    Rejected,
}

/// Outcome of one specialist (or the mechanical pass).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub id: String,
    pub label: String,
    pub status: TaskStatus,
    /// Empty when rejected.
    pub items: Vec<FeedbackItem>,
    pub error: Option<String>,
    /// Set for the mechanical-correctness pass.
    #[serde(default)]
    pub mechanical: bool,
}

impl SpecialistResult {
    fn fulfilled(id: &str, label: &str, items: Vec<FeedbackItem>, mechanical: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            status: TaskStatus::Fulfilled,
            items,
            error: None,
            mechanical,
        }
    }

    fn rejected(id: &str, label: &str, error: String, mechanical: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            status: TaskStatus::Rejected,
            items: Vec::new(),
            error: Some(error),
            mechanical,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status == TaskStatus::Fulfilled
    }
}

/// Runs phase 1.
pub struct FanOutScheduler<'a> {
    ctx: &'a EngineContext,
    reporter: &'a RunReporter,
}

impl<'a> FanOutScheduler<'a> {
    pub fn new(ctx: &'a EngineContext, reporter: &'a RunReporter) -> Self {
        Self { ctx, reporter }
    }

    /// Runs every task and, when enabled, the mechanical pass.
    ///
    /// Tasks in a batch run concurrently; the next batch starts after the
    /// whole batch has finished and the batch delay has elapsed. The
    /// mechanical pass runs alone after the last batch, one more delay later.
    /// One result is returned per task, in task order, followed by the
    /// mechanical result.
    pub async fn run(
        &self,
        document: &str,
        tasks: &[SpecialistTask],
        options: &AnalysisOptions,
        mechanical: &MechanicalProfile,
    ) -> Vec<SpecialistResult> {
        for task in tasks {
            self.reporter.pending(&task.id);
        }
        if options.mechanical_pass {
            self.reporter.pending(&mechanical.id);
        }

        let config = &self.ctx.config;
        let batch_size = config.effective_batch_size();
        let batch_count = tasks.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(tasks.len() + 1);

        for (index, batch) in tasks.chunks(batch_size).enumerate() {
            let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
            info!(batch = index + 1, of = batch_count, specialists = ?ids, "Starting specialist batch");

            let batch_results =
                join_all(batch.iter().map(|task| self.run_specialist(document, task, options.extended_thinking))).await;
            results.extend(batch_results);

            if index + 1 < batch_count {
                info!(delay_ms = config.batch_delay_ms, "Pausing before next batch");
                tokio::time::sleep(config.batch_delay()).await;
            }
        }

        if options.mechanical_pass {
            tokio::time::sleep(config.batch_delay()).await;
            results.push(self.run_mechanical(document, mechanical).await);
        }

        results
    }

    async fn run_specialist(&self, document: &str, task: &SpecialistTask, extended_thinking: bool) -> SpecialistResult {
        self.reporter.started(&task.id);
        if task.has_tools() {
            self.reporter.tools(&task.id, task.capability_labels());
        }

        let started = Instant::now();
        let tool_loop = ToolLoop::new(self.ctx, task, self.reporter, extended_thinking);
        let outcome = self.bounded(&task.label, tool_loop.run(document)).await;
        self.settle(&task.id, &task.label, outcome, started, false)
    }

    async fn run_mechanical(&self, document: &str, profile: &MechanicalProfile) -> SpecialistResult {
        self.reporter.started(&profile.id);

        let config = &self.ctx.config;
        let started = Instant::now();
        let call = self.ctx.complete_text(
            &config.mechanical_model,
            config.max_tokens,
            &profile.instructions,
            format!("{MECHANICAL_USER_PREFIX}{document}"),
        );
        let outcome = self.bounded(&profile.name, call).await;
        self.settle(&profile.id, &profile.name, outcome, started, true)
    }

    /// Applies the per-specialist wall-clock allowance.
    async fn bounded<F>(&self, label: &str, work: F) -> Result<String>
    where
        F: std::future::Future<Output = Result<String>>,
    {
        let allowance = self.ctx.config.specialist_timeout();
        tokio::time::timeout(allowance, work).await.unwrap_or_else(|_| {
            Err(OrchestrationError::Timeout {
                what: format!("{label} agent"),
                seconds: self.ctx.config.specialist_timeout_secs,
            })
        })
    }

    fn settle(&self, id: &str, label: &str, outcome: Result<String>, started: Instant, mechanical: bool) -> SpecialistResult {
        let elapsed = started.elapsed();
        match outcome {
            Ok(text) => {
                let items = parse_feedback(&text);
                info!(specialist = %id, items = items.len(), elapsed_ms = elapsed.as_millis() as u64, "Specialist complete");
                self.reporter.complete(id, items.len(), elapsed);
                SpecialistResult::fulfilled(id, label, items, mechanical)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(specialist = %id, error = %message, elapsed_ms = elapsed.as_millis() as u64, "Specialist failed");
                self.reporter.error(id, message.clone(), elapsed);
                SpecialistResult::rejected(id, label, message, mechanical)
            }
        }
    }
}
