//! In-memory processed ledger

use crate::error::LedgerError;
use crate::ports::ProcessedLedger;
use crate::types::LedgerEntry;
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local ledger keyed by source asset key
///
/// Suitable for a long-running process that performs repeated batch runs;
/// records do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: DashMap<String, LedgerEntry>,
}

impl InMemoryLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded assets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if ledger is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ProcessedLedger for InMemoryLedger {
    async fn lookup(&self, key: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn record(&self, key: &str, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}
