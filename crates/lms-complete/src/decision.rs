//! Append-only audit trail of the branches taken during one session.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which layer made a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionCategory {
    Discovery,
    Injection,
    Driver,
    Verification,
    Fallback,
    Pipeline,
    Orchestrator,
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Monotonic sequence number, unaffected by trimming.
    pub seq: u64,
    pub category: DecisionCategory,
    pub step: String,
    pub decision: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// RFC 3339.
    pub timestamp: String,
}

/// Bounded, FIFO-trimmed decision log.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    records: VecDeque<DecisionRecord>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::with_capacity(500)
    }
}

impl DecisionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_seq: 0,
            dropped: 0,
        }
    }

    pub fn record(
        &mut self,
        category: DecisionCategory,
        step: impl Into<String>,
        decision: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.push(category, step.into(), decision.into(), reason.into(), None);
    }

    pub fn record_with(
        &mut self,
        category: DecisionCategory,
        step: impl Into<String>,
        decision: impl Into<String>,
        reason: impl Into<String>,
        data: Value,
    ) {
        self.push(category, step.into(), decision.into(), reason.into(), Some(data));
    }

    fn push(
        &mut self,
        category: DecisionCategory,
        step: String,
        decision: String,
        reason: String,
        data: Option<Value>,
    ) {
        tracing::debug!(?category, %step, %decision, %reason, "decision");
        self.records.push_back(DecisionRecord {
            seq: self.next_seq,
            category,
            step,
            decision,
            reason,
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        self.next_seq += 1;
        while self.records.len() > self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
    }

    pub fn by_category(&self, category: DecisionCategory) -> Vec<&DecisionRecord> {
        self.records
            .iter()
            .filter(|r| r.category == category)
            .collect()
    }

    /// Flat copy of every retained record, oldest first.
    pub fn export(&self) -> Vec<DecisionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records trimmed away by the capacity bound.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
