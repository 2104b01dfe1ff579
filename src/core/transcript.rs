use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which step of the session a transmission belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Select,
    Probe,
    Fetch,
}

/// One transmission made by a card handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub label: String,
    pub apdu: Vec<u8>,
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Ordered log of every transmission in a session
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    records: Vec<ExchangeRecord>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ExchangeRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ExchangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Phases in transmission order
    pub fn phases(&self) -> Vec<Phase> {
        self.records.iter().map(|r| r.phase).collect()
    }

    /// Export transcript to JSON
    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.records).context("Failed to serialize transcript")
    }

    pub fn statistics(&self) -> TranscriptStatistics {
        let total_exchanges = self.records.len();
        let successful_exchanges = self.records.iter().filter(|r| r.success).count();

        let average_duration_ms = if total_exchanges > 0 {
            self.records.iter().map(|r| r.duration_ms).sum::<u64>() / total_exchanges as u64
        } else {
            0
        };

        TranscriptStatistics {
            total_exchanges,
            successful_exchanges,
            failed_exchanges: total_exchanges - successful_exchanges,
            average_duration_ms,
        }
    }
}

/// Statistics about a session's transmissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptStatistics {
    pub total_exchanges: usize,
    pub successful_exchanges: usize,
    pub failed_exchanges: usize,
    pub average_duration_ms: u64,
}
