//! Run-scoped usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::message::Usage;

/// Concurrency-safe counters shared by every call made during a run.
///
/// One accumulator is constructed by the caller, handed to the transport and
/// the orchestration engine, reset when a run starts and read when it ends.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    search_invocations: AtomicU64,
    sub_calls: AtomicU64,
}

impl UsageAccumulator {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
        self.search_invocations.store(0, Ordering::Relaxed);
        self.sub_calls.store(0, Ordering::Relaxed);
    }

    /// Adds one call's token counts.
    pub fn record_tokens(&self, usage: &Usage) {
        self.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    /// Adds detected web search invocations.
    pub fn record_searches(&self, count: u64) {
        self.search_invocations.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts one delegated sub-call.
    pub fn record_sub_call(&self) {
        self.sub_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the counters.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            search_invocations: self.search_invocations.load(Ordering::Relaxed),
            sub_calls: self.sub_calls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`UsageAccumulator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Cumulative input tokens.
    pub input_tokens: u64,
    /// Cumulative output tokens.
    pub output_tokens: u64,
    /// Web searches run by the service.
    pub search_invocations: u64,
    /// Delegated sub-calls issued.
    pub sub_calls: u64,
}

impl UsageSnapshot {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
