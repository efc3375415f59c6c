// Top-level analysis run: phase 1, then refinement

use std::sync::Arc;

use forge_abstraction::{CompletionTransport, UsageAccumulator, UsageSnapshot};
use forge_models::{AnthropicClient, ConnectionConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::catalogue::Catalogue;
use crate::config::{AnalysisOptions, EngineConfig};
use crate::context::EngineContext;
use crate::error::{OrchestrationError, Result};
use crate::events::RunReporter;
use crate::feedback::FeedbackItem;
use crate::refine::RefinementPipeline;
use crate::scheduler::{FanOutScheduler, SpecialistResult};
use crate::specialist::build_tasks;

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Final items with ids `1..=N`; mechanical items come last.
    pub items: Vec<FeedbackItem>,
    pub mechanical_items: usize,
    /// Phase 1 outcomes, one per specialist plus the mechanical pass if run.
    pub specialists: Vec<SpecialistResult>,
    pub usage: UsageSnapshot,
    pub elapsed_ms: u64,
}

/// A configured analysis engine.
///
/// Runs on one instance share its usage accumulator; each run resets it.
pub struct AnalysisRun {
    ctx: EngineContext,
    catalogue: Catalogue,
    reporter: RunReporter,
}

impl AnalysisRun {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        usage: Arc<UsageAccumulator>,
        config: EngineConfig,
        catalogue: Catalogue,
    ) -> Self {
        Self {
            ctx: EngineContext::new(transport, config, usage),
            catalogue,
            reporter: RunReporter::silent(),
        }
    }

    /// An engine talking to the Messages API over HTTP.
    pub fn anthropic(connection: ConnectionConfig, retry: RetryPolicy, config: EngineConfig, catalogue: Catalogue) -> Self {
        let usage = Arc::new(UsageAccumulator::new());
        let client = AnthropicClient::new(connection, Arc::clone(&usage)).with_retry_policy(retry);
        Self::new(Arc::new(client), usage, config, catalogue)
    }

    /// Sends progress events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: RunReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.ctx.usage.snapshot()
    }

    /// Analyzes `document`.
    ///
    /// # Errors
    /// [`OrchestrationError::AllSpecialistsFailed`] when no phase 1 specialist
    /// succeeded. Later phases never fail the run.
    pub async fn execute(&self, document: &str, options: &AnalysisOptions) -> Result<AnalysisReport> {
        self.ctx.usage.reset();
        let started = Instant::now();

        let tasks = build_tasks(&self.catalogue, options);
        info!(
            specialists = tasks.len(),
            web_search = options.web_search,
            delegation = options.delegation,
            mechanical_pass = options.mechanical_pass,
            chars = document.len(),
            "Starting analysis run"
        );

        let results = FanOutScheduler::new(&self.ctx, &self.reporter)
            .run(document, &tasks, options, &self.catalogue.mechanical)
            .await;

        let specialists = results.iter().filter(|r| !r.mechanical).count();
        if !results.iter().any(|r| !r.mechanical && r.is_fulfilled()) {
            error!(specialists, "Every specialist failed");
            return Err(OrchestrationError::AllSpecialistsFailed { failed: specialists });
        }

        let refined = RefinementPipeline::new(&self.ctx, &self.catalogue).run(document, &results).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let usage = self.ctx.usage.snapshot();
        info!(
            items = refined.items.len(),
            mechanical_items = refined.mechanical_items,
            total_tokens = usage.total_tokens(),
            searches = usage.search_invocations,
            sub_calls = usage.sub_calls,
            elapsed_ms,
            "Analysis run complete"
        );

        Ok(AnalysisReport {
            items: refined.items,
            mechanical_items: refined.mechanical_items,
            specialists: results,
            usage,
            elapsed_ms,
        })
    }
}

impl std::fmt::Debug for AnalysisRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRun").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}
