//! Backfill bookkeeping: one record per strategy, naming the index being
//! backfilled and how far along it is.
//!
//! ```text
//! initial ──start──▶ indexing ──mark complete──▶ complete
//!     ▲                  │
//!     └── current index changed (any state resets to initial)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    Initial,
    Indexing,
    Complete,
    Error,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillStatus::Initial => "initial",
            BackfillStatus::Indexing => "indexing",
            BackfillStatus::Complete => "complete",
            BackfillStatus::Error => "error",
        }
    }
}

impl fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackfillStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "initial" => BackfillStatus::Initial,
            "indexing" => BackfillStatus::Indexing,
            "complete" => BackfillStatus::Complete,
            "error" => BackfillStatus::Error,
            other => bail!("unknown backfill status: {other}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBackfill {
    pub strategy_name: String,
    pub specific_indexname: String,
    pub status: BackfillStatus,
    pub error_message: Option<String>,
    pub modified: DateTime<Utc>,
}

impl IndexBackfill {
    pub fn new(strategy_name: &str, specific_indexname: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            specific_indexname: specific_indexname.to_string(),
            status: BackfillStatus::Initial,
            error_message: None,
            modified: Utc::now(),
        }
    }

    /// Move to `indexing` for `indexname`; a different index restarts from `initial`.
    pub fn start(&mut self, indexname: &str) -> Result<()> {
        if self.specific_indexname != indexname {
            self.specific_indexname = indexname.to_string();
            self.status = BackfillStatus::Initial;
        }
        match self.status {
            BackfillStatus::Initial | BackfillStatus::Error => {
                self.status = BackfillStatus::Indexing;
                self.error_message = None;
                self.modified = Utc::now();
                Ok(())
            }
            other => bail!("cannot start backfill of {indexname}: already {other}"),
        }
    }

    pub fn mark_complete(&mut self) -> Result<()> {
        if self.status != BackfillStatus::Indexing {
            bail!(
                "cannot complete backfill of {}: status is {}",
                self.specific_indexname,
                self.status
            );
        }
        self.status = BackfillStatus::Complete;
        self.modified = Utc::now();
        Ok(())
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = BackfillStatus::Error;
        self.error_message = Some(message.into());
        self.modified = Utc::now();
    }
}

#[async_trait]
pub trait BackfillStore: Send + Sync {
    async fn get_backfill(&self, strategy_name: &str) -> Result<Option<IndexBackfill>>;

    async fn save_backfill(&self, backfill: &IndexBackfill) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryBackfillStore {
    backfills: RwLock<HashMap<String, IndexBackfill>>,
}

impl InMemoryBackfillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackfillStore for InMemoryBackfillStore {
    async fn get_backfill(&self, strategy_name: &str) -> Result<Option<IndexBackfill>> {
        let backfills = self.backfills.read().unwrap_or_else(PoisonError::into_inner);
        Ok(backfills.get(strategy_name).cloned())
    }

    async fn save_backfill(&self, backfill: &IndexBackfill) -> Result<()> {
        let mut backfills = self.backfills.write().unwrap_or_else(PoisonError::into_inner);
        backfills.insert(backfill.strategy_name.clone(), backfill.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_transitions() {
        let mut backfill = IndexBackfill::new("s", "s__a");
        assert!(backfill.mark_complete().is_err());
        backfill.start("s__a").unwrap();
        assert_eq!(backfill.status, BackfillStatus::Indexing);
        assert!(backfill.start("s__a").is_err());
        backfill.mark_complete().unwrap();
        assert_eq!(backfill.status, BackfillStatus::Complete);
        // a new current index restarts the cycle
        backfill.start("s__b").unwrap();
        assert_eq!(backfill.specific_indexname, "s__b");
        assert_eq!(backfill.status, BackfillStatus::Indexing);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            BackfillStatus::Initial,
            BackfillStatus::Indexing,
            BackfillStatus::Complete,
            BackfillStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<BackfillStatus>().unwrap(), status);
        }
    }
}
