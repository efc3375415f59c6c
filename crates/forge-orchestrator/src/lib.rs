//! Multi-phase document review engine.
//!
//! A run fans a document out to specialist reviewers in staggered batches
//! (phase 1), merges their feedback (phase 2) and filters it (phase 3).
//! Specialists may use server-side web search and delegate research to
//! bounded sub-calls through a tool-use loop.
//!
//! ```no_run
//! # async fn example() -> forge_orchestrator::Result<()> {
//! use forge_models::{ConnectionConfig, RetryPolicy};
//! use forge_orchestrator::{AnalysisOptions, AnalysisRun, Catalogue, EngineConfig};
//!
//! let run = AnalysisRun::anthropic(
//!     ConnectionConfig::direct("sk-..."),
//!     RetryPolicy::default(),
//!     EngineConfig::default(),
//!     Catalogue::builtin()?,
//! );
//! let report = run.execute("Text to review.", &AnalysisOptions::default()).await?;
//! println!("{} items", report.items.len());
//! # Ok(())
//! # }
//! ```

pub mod catalogue;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod feedback;
pub mod refine;
pub mod run;
pub mod scheduler;
pub mod specialist;
pub mod subagent;
pub mod tool_loop;

pub use catalogue::{Catalogue, MechanicalProfile, SpecialistProfile};
pub use config::{AnalysisOptions, EngineConfig, QUANTITATIVE_SPECIALIST};
pub use context::EngineContext;
pub use error::{OrchestrationError, Result};
pub use events::{EventDetail, RunEvent, RunReporter, RunStatus};
pub use feedback::{FeedbackItem, MECHANICAL_CATEGORY, MECHANICAL_SEVERITY, Source, parse_feedback, renumber};
pub use refine::{RefinedFeedback, RefinementPipeline};
pub use run::{AnalysisReport, AnalysisRun};
pub use scheduler::{FanOutScheduler, SpecialistResult, TaskStatus};
pub use specialist::{SpecialistTask, build_tasks};
pub use subagent::{DELEGATION_TOOL_NAME, DelegationRequest, SubCallHandler};
pub use tool_loop::ToolLoop;
