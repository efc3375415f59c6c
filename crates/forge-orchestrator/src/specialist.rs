//! Per-run specialist tasks.

use forge_abstraction::ToolDeclaration;

use crate::catalogue::Catalogue;
use crate::config::{AnalysisOptions, EngineConfig};
use crate::subagent::delegation_tool;

/// One specialist, resolved against the run options.
///
/// Capability flags are fixed here and never change once the task's loop
/// has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistTask {
    pub id: String,
    pub label: String,
    pub uses_search: bool,
    pub uses_delegation: bool,
    /// Shared preamble, role instructions and, when searching, the search preamble.
    pub instructions: String,
}

impl SpecialistTask {
    /// Tool declarations sent with every turn of this task.
    pub fn tools(&self, config: &EngineConfig) -> Vec<ToolDeclaration> {
        let mut tools = Vec::new();
        if self.uses_search {
            tools.push(ToolDeclaration::web_search(config.web_search_max_uses));
        }
        if self.uses_delegation {
            tools.push(delegation_tool(config.max_sub_calls));
        }
        tools
    }

    /// Labels for the capabilities in use, for progress display.
    pub fn capability_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.uses_search {
            labels.push("web search".to_string());
        }
        if self.uses_delegation {
            labels.push("sub-agents".to_string());
        }
        labels
    }

    pub fn has_tools(&self) -> bool {
        self.uses_search || self.uses_delegation
    }
}

/// Builds one task per catalogue specialist, in catalogue order.
pub fn build_tasks(catalogue: &Catalogue, options: &AnalysisOptions) -> Vec<SpecialistTask> {
    catalogue
        .specialists
        .iter()
        .map(|profile| {
            let uses_search = (profile.search && options.web_search) || options.force_search.contains(&profile.id);
            let uses_delegation = profile.delegation && options.delegation;

            let mut instructions = format!("{}\n\n{}", catalogue.preamble, profile.instructions);
            if uses_search {
                instructions.push_str(&catalogue.search_preamble);
            }

            SpecialistTask {
                id: profile.id.clone(),
                label: profile.name.clone(),
                uses_search,
                uses_delegation,
                instructions,
            }
        })
        .collect()
}
