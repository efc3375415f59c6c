//! Specialist catalogue: the instruction text for every pass, keyed by
//! specialist id.
//!
//! The engine treats instruction text as opaque. A built-in catalogue is
//! compiled in; callers can load a replacement TOML file with the same shape.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};

const BUILTIN: &str = include_str!("../catalogue/default.toml");

/// One phase 1 specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistProfile {
    /// Stable identity, used in events and results.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// May use web search when the run allows it.
    #[serde(default)]
    pub search: bool,
    /// May delegate research sub-calls when the run allows it.
    #[serde(default)]
    pub delegation: bool,
    /// Role-specific instructions appended to the shared preamble.
    pub instructions: String,
}

/// The mechanical-correctness pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicalProfile {
    pub id: String,
    pub name: String,
    /// Complete instruction text; the shared preamble is not prepended.
    pub instructions: String,
}

/// Every instruction text a run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    /// Shared framing for every specialist.
    pub preamble: String,
    /// Appended to a specialist's instructions when it searches.
    pub search_preamble: String,
    /// Phase 1 specialists, in run order.
    pub specialists: Vec<SpecialistProfile>,
    pub mechanical: MechanicalProfile,
    /// Phase 2 instructions.
    pub merge_instructions: String,
    /// Phase 3 instructions.
    pub filter_instructions: String,
}

impl Catalogue {
    /// The compiled-in catalogue.
    ///
    /// # Errors
    /// Only if the embedded document is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN)
    }

    /// Parses a catalogue from TOML text.
    ///
    /// # Errors
    /// Returns [`OrchestrationError::Catalogue`] on parse or validation failure.
    pub fn from_toml(text: &str) -> Result<Self> {
        let catalogue: Self = toml::from_str(text).map_err(|e| OrchestrationError::Catalogue(e.to_string()))?;
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Loads a catalogue file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Looks up a specialist by id.
    pub fn specialist(&self, id: &str) -> Option<&SpecialistProfile> {
        self.specialists.iter().find(|profile| profile.id == id)
    }

    fn validate(&self) -> Result<()> {
        if self.specialists.is_empty() {
            return Err(OrchestrationError::Catalogue("catalogue defines no specialists".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.specialists {
            if profile.id.trim().is_empty() {
                return Err(OrchestrationError::Catalogue("specialist with empty id".to_string()));
            }
            if !seen.insert(profile.id.as_str()) {
                return Err(OrchestrationError::Catalogue(format!("duplicate specialist id '{}'", profile.id)));
            }
        }

        if seen.contains(self.mechanical.id.as_str()) {
            return Err(OrchestrationError::Catalogue(format!(
                "mechanical pass id '{}' collides with a specialist",
                self.mechanical.id
            )));
        }

        Ok(())
    }
}
