//! Run progress events.
//!
//! Every specialist (and the mechanical pass when enabled) produces exactly one
//! `Pending` event, then any number of `Running` updates, then exactly one
//! terminal `Complete` or `Error`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Objective previews in delegation events are cut to this many characters.
const OBJECTIVE_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Payload attached to a [`RunEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    None,
    /// Capabilities the specialist is running with.
    Tools { labels: Vec<String> },
    /// A delegated sub-call started; `count` is this specialist's running total.
    DelegationStarted { count: u32, objective: String, labels: Vec<String> },
    DelegationFinished { count: u32, labels: Vec<String> },
    Complete { items: usize, elapsed_ms: u64 },
    Error { message: String, elapsed_ms: u64 },
}

/// A status update for one specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub specialist: String,
    pub status: RunStatus,
    pub detail: EventDetail,
}

/// Sends [`RunEvent`]s to the caller, if anyone is listening.
#[derive(Debug, Clone, Default)]
pub struct RunReporter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunReporter {
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that drops every event.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    fn emit(&self, specialist: &str, status: RunStatus, detail: EventDetail) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(RunEvent { specialist: specialist.to_string(), status, detail });
        }
    }

    pub fn pending(&self, specialist: &str) {
        self.emit(specialist, RunStatus::Pending, EventDetail::None);
    }

    pub fn started(&self, specialist: &str) {
        self.emit(specialist, RunStatus::Running, EventDetail::None);
    }

    pub fn tools(&self, specialist: &str, labels: Vec<String>) {
        self.emit(specialist, RunStatus::Running, EventDetail::Tools { labels });
    }

    pub fn delegation_started(&self, specialist: &str, count: u32, objective: &str, labels: Vec<String>) {
        let objective = objective.chars().take(OBJECTIVE_PREVIEW_CHARS).collect();
        self.emit(specialist, RunStatus::Running, EventDetail::DelegationStarted { count, objective, labels });
    }

    pub fn delegation_finished(&self, specialist: &str, count: u32, labels: Vec<String>) {
        self.emit(specialist, RunStatus::Running, EventDetail::DelegationFinished { count, labels });
    }

    pub fn complete(&self, specialist: &str, items: usize, elapsed: Duration) {
        self.emit(specialist, RunStatus::Complete, EventDetail::Complete { items, elapsed_ms: millis(elapsed) });
    }

    pub fn error(&self, specialist: &str, message: impl Into<String>, elapsed: Duration) {
        let detail = EventDetail::Error { message: message.into(), elapsed_ms: millis(elapsed) };
        self.emit(specialist, RunStatus::Error, detail);
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        reporter.pending("evidence");
        reporter.started("evidence");
        reporter.complete("evidence", 4, Duration::from_millis(1500));

        let statuses: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.status).collect();
        assert_eq!(statuses, [RunStatus::Pending, RunStatus::Running, RunStatus::Complete]);
    }

    #[test]
    fn test_objective_preview_truncated() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        reporter.delegation_started("steelman", 1, &"é".repeat(100), vec![]);

        let event = rx.try_recv().unwrap();
        match event.detail {
            EventDetail::DelegationStarted { count, objective, .. } => {
                assert_eq!(count, 1);
                assert_eq!(objective.chars().count(), 60);
            }
            other => panic!("unexpected detail: {other:?}"),
        }
    }

    #[test]
    fn test_silent_reporter_and_closed_receiver() {
        RunReporter::silent().error("math", "boom", Duration::ZERO);

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        RunReporter::new(tx).pending("math");
    }

    #[test]
    fn test_event_serialization() {
        let event = RunEvent {
            specialist: "clarity".to_string(),
            status: RunStatus::Error,
            detail: EventDetail::Error { message: "timeout".to_string(), elapsed_ms: 10 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"]["kind"], "error");
        assert!(RunStatus::Error.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
