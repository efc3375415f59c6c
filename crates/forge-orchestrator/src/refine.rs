//! Phases 2 and 3: merge specialist output, then filter it.
//!
//! Both passes are single tool-less calls and each has a local fallback, so a
//! run that got past phase 1 always produces a result.

use tracing::{info, warn};

use crate::catalogue::Catalogue;
use crate::context::EngineContext;
use crate::error::Result;
use crate::feedback::{FeedbackItem, mark_mechanical, parse_feedback, renumber};
use crate::scheduler::SpecialistResult;

/// Final output of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinedFeedback {
    /// Filtered items followed by mechanical items, ids `1..=N`.
    pub items: Vec<FeedbackItem>,
    /// How many of `items` came from the mechanical pass.
    pub mechanical_items: usize,
}

pub struct RefinementPipeline<'a> {
    ctx: &'a EngineContext,
    catalogue: &'a Catalogue,
}

impl<'a> RefinementPipeline<'a> {
    pub fn new(ctx: &'a EngineContext, catalogue: &'a Catalogue) -> Self {
        Self { ctx, catalogue }
    }

    /// Merges, filters, renumbers and appends mechanical items.
    pub async fn run(&self, document: &str, results: &[SpecialistResult]) -> RefinedFeedback {
        let merged = self.merge(document, results).await;

        let mut mechanical: Vec<FeedbackItem> = results
            .iter()
            .filter(|r| r.mechanical && r.is_fulfilled())
            .flat_map(|r| r.items.iter().cloned())
            .collect();

        if merged.is_empty() && mechanical.is_empty() {
            info!("No feedback after merge pass, skipping filter pass");
            return RefinedFeedback::default();
        }

        let mut items = self.filter(document, merged).await;
        mark_mechanical(&mut mechanical);
        let mechanical_items = mechanical.len();
        items.extend(mechanical);
        renumber(&mut items, 1);

        RefinedFeedback { items, mechanical_items }
    }

    /// Phase 2.
    ///
    /// Only successful, non-mechanical specialists with at least one item are
    /// sent. Unparseable output yields an empty list; a failed call falls back
    /// to the concatenated raw items.
    pub async fn merge(&self, document: &str, results: &[SpecialistResult]) -> Vec<FeedbackItem> {
        let inputs: Vec<&SpecialistResult> =
            results.iter().filter(|r| r.is_fulfilled() && !r.mechanical && !r.items.is_empty()).collect();
        if inputs.is_empty() {
            return Vec::new();
        }

        let outputs = match specialist_outputs(&inputs) {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(error = %e, "Could not serialize specialist output, using raw items");
                return concatenate(&inputs);
            }
        };
        let user = format!("ORIGINAL TEXT:\n\"\"\"\n{document}\n\"\"\"\n\nSPECIALIST AGENT OUTPUTS:\n{outputs}");

        match self.call(&self.catalogue.merge_instructions, user).await {
            Ok(text) => {
                let items = parse_feedback(&text);
                info!(specialists = inputs.len(), items = items.len(), "Merge pass complete");
                items
            }
            Err(e) => {
                warn!(error = %e, "Merge pass failed, using raw specialist items");
                concatenate(&inputs)
            }
        }
    }

    /// Phase 3.
    ///
    /// Skipped for an empty list. Output with no list in it keeps nothing; a
    /// failed call passes `merged` through unchanged.
    pub async fn filter(&self, document: &str, merged: Vec<FeedbackItem>) -> Vec<FeedbackItem> {
        if merged.is_empty() {
            return merged;
        }

        let aggregated = match serde_json::to_string_pretty(&merged) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Could not serialize merged feedback, skipping filter pass");
                return merged;
            }
        };
        let user = format!("ORIGINAL TEXT:\n\"\"\"\n{document}\n\"\"\"\n\nAGGREGATED FEEDBACK:\n{aggregated}");

        match self.call(&self.catalogue.filter_instructions, user).await {
            Ok(text) => {
                let items = parse_feedback(&text);
                info!(before = merged.len(), after = items.len(), "Filter pass complete");
                items
            }
            Err(e) => {
                warn!(error = %e, "Filter pass failed, keeping merged items");
                merged
            }
        }
    }

    async fn call(&self, system: &str, user: String) -> Result<String> {
        let config = &self.ctx.config;
        self.ctx.complete_text(&config.model, config.max_tokens, system, user).await
    }
}

/// `=== <label> Agent ===` sections, one per specialist.
fn specialist_outputs(inputs: &[&SpecialistResult]) -> serde_json::Result<String> {
    let sections = inputs
        .iter()
        .map(|r| serde_json::to_string_pretty(&r.items).map(|json| format!("=== {} Agent ===\n{json}", r.label)))
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(sections.join("\n\n"))
}

/// Merge fallback: every raw item, tagged with its specialist, numbered from 1.
fn concatenate(inputs: &[&SpecialistResult]) -> Vec<FeedbackItem> {
    let mut items: Vec<FeedbackItem> = inputs
        .iter()
        .flat_map(|r| {
            r.items.iter().cloned().map(|mut item| {
                item.agents = vec![r.label.clone()];
                item
            })
        })
        .collect();
    renumber(&mut items, 1);
    items
}
