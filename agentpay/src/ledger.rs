//! Append-only audit ledger of payment attempts.
//!
//! An entry is recorded in `pending` state **before** any side effect on an
//! external system, so that partial failures can be reconstructed after the
//! fact. Status updates are monotonic: once an entry reaches a terminal
//! status it is write-once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::Storage;
use crate::timestamp::now_unix;
use crate::types::{Metadata, PaymentMethod, PaymentStatus};

/// Storage key prefix for ledger entries.
const KEY_PREFIX: &str = "ledger:";

/// Default result cap for [`Ledger::query`].
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// A single payment attempt on the ledger.
///
/// Immutable on creation except for `status`, transaction identifiers, and
/// a bounded metadata merge via [`Ledger::update_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub id: String,
    /// Source wallet.
    pub wallet_id: String,
    /// Wallet set, for grouped queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_set_id: Option<String>,
    /// Payment recipient.
    pub recipient: String,
    /// Payment amount.
    pub amount: Decimal,
    /// Current status.
    pub status: PaymentStatus,
    /// Transport that handled (or would have handled) the payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<PaymentMethod>,
    /// Custody provider transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_tx_id: Option<String>,
    /// On-chain transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Guards that passed before execution.
    #[serde(default)]
    pub guards_passed: Vec<String>,
    /// Human-readable purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds at the last update.
    pub updated_at: u64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl LedgerEntry {
    /// Creates a pending entry for a payment attempt.
    #[must_use]
    pub fn new(wallet_id: impl Into<String>, recipient: impl Into<String>, amount: Decimal) -> Self {
        let now = now_unix();
        Self {
            id: Uuid::new_v4().to_string(),
            wallet_id: wallet_id.into(),
            wallet_set_id: None,
            recipient: recipient.into(),
            amount,
            status: PaymentStatus::Pending,
            method: None,
            provider_tx_id: None,
            tx_hash: None,
            guards_passed: Vec::new(),
            purpose: None,
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        }
    }

    /// Sets the wallet-set id.
    #[must_use]
    pub fn with_wallet_set(mut self, wallet_set_id: Option<String>) -> Self {
        self.wallet_set_id = wallet_set_id;
        self
    }

    /// Sets the purpose.
    #[must_use]
    pub fn with_purpose(mut self, purpose: Option<String>) -> Self {
        self.purpose = purpose;
        self
    }

    /// Sets the initial metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Fields applied together with a status transition.
#[derive(Debug, Default, Clone)]
pub struct StatusUpdate {
    /// New status.
    pub status: PaymentStatus,
    /// Transport, recorded once known.
    pub method: Option<PaymentMethod>,
    /// Provider transaction id, if one was issued.
    pub provider_tx_id: Option<String>,
    /// On-chain hash, if one was issued.
    pub tx_hash: Option<String>,
    /// Guards that passed.
    pub guards_passed: Option<Vec<String>>,
    /// Metadata entries merged into the existing map.
    pub metadata: Metadata,
}

impl StatusUpdate {
    /// Creates an update that only moves the status.
    #[must_use]
    pub fn to(status: PaymentStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Merges a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Filters for [`Ledger::query`]. Empty filters match everything.
#[derive(Debug, Default, Clone)]
pub struct LedgerQuery {
    /// Match a wallet id.
    pub wallet_id: Option<String>,
    /// Match a wallet-set id.
    pub wallet_set_id: Option<String>,
    /// Match a status.
    pub status: Option<PaymentStatus>,
    /// Match a recipient.
    pub recipient: Option<String>,
    /// Entries created at or after this unix second.
    pub from: Option<u64>,
    /// Entries created at or before this unix second.
    pub to: Option<u64>,
    /// Result cap; defaults to [`DEFAULT_QUERY_LIMIT`].
    pub limit: Option<usize>,
}

impl LedgerQuery {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(wallet_id) = &self.wallet_id {
            if &entry.wallet_id != wallet_id {
                return false;
            }
        }
        if let Some(set_id) = &self.wallet_set_id {
            if entry.wallet_set_id.as_ref() != Some(set_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(recipient) = &self.recipient {
            if &entry.recipient != recipient {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }
}

/// The audit ledger.
#[derive(Clone)]
pub struct Ledger {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

fn key_for(entry_id: &str) -> String {
    format!("{KEY_PREFIX}{entry_id}")
}

impl Ledger {
    /// Creates a ledger over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Records a new entry and returns its id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn record(&self, entry: &LedgerEntry) -> Result<String, PaymentError> {
        let value = serde_json::to_value(entry)
            .map_err(|e| PaymentError::Validation(format!("unserializable ledger entry: {e}")))?;
        self.storage.put(&key_for(&entry.id), value).await?;
        Ok(entry.id.clone())
    }

    /// Returns the entry with the given id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get(&self, entry_id: &str) -> Result<Option<LedgerEntry>, PaymentError> {
        let value = self.storage.get(&key_for(entry_id)).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Applies a status transition.
    ///
    /// Returns `false` (without writing) when the entry does not exist or is
    /// already terminal — terminal statuses are write-once.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn update_status(
        &self,
        entry_id: &str,
        update: StatusUpdate,
    ) -> Result<bool, PaymentError> {
        use std::sync::atomic::{AtomicBool, Ordering};

        let now = now_unix();
        let applied = Arc::new(AtomicBool::new(false));
        let applied_in_mutator = Arc::clone(&applied);
        let stored = self
            .storage
            .update(
                &key_for(entry_id),
                Box::new(move |current| {
                    let value = current?;
                    let Ok(mut entry) = serde_json::from_value::<LedgerEntry>(value.clone()) else {
                        applied_in_mutator.store(false, Ordering::SeqCst);
                        return Some(value);
                    };
                    if entry.status.is_terminal() {
                        // Terminal states are write-once.
                        applied_in_mutator.store(false, Ordering::SeqCst);
                        return Some(value);
                    }
                    entry.status = update.status;
                    entry.updated_at = now;
                    if let Some(method) = update.method {
                        entry.method = Some(method);
                    }
                    if let Some(tx_id) = &update.provider_tx_id {
                        entry.provider_tx_id = Some(tx_id.clone());
                    }
                    if let Some(tx_hash) = &update.tx_hash {
                        entry.tx_hash = Some(tx_hash.clone());
                    }
                    if let Some(guards) = &update.guards_passed {
                        entry.guards_passed = guards.clone();
                    }
                    for (k, v) in &update.metadata {
                        entry.metadata.insert(k.clone(), v.clone());
                    }
                    applied_in_mutator.store(true, Ordering::SeqCst);
                    serde_json::to_value(entry).ok().or(Some(value))
                }),
            )
            .await?;

        if stored.is_none() {
            warn!(entry_id, "ledger status update for unknown entry");
            return Ok(false);
        }
        let applied = applied.load(std::sync::atomic::Ordering::SeqCst);
        if !applied {
            warn!(entry_id, "ledger status update refused: entry is terminal");
        }
        Ok(applied)
    }

    /// Queries entries, newest first, capped at the query limit.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, PaymentError> {
        let raw = self.storage.scan(KEY_PREFIX).await?;
        let mut entries: Vec<LedgerEntry> = raw
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .filter(|e| query.matches(e))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entries.truncate(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT));
        Ok(entries)
    }

    /// Sums completed outflows for a wallet.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn total_spent(&self, wallet_id: &str) -> Result<Decimal, PaymentError> {
        let entries = self
            .query(&LedgerQuery {
                wallet_id: Some(wallet_id.to_owned()),
                status: Some(PaymentStatus::Completed),
                limit: Some(usize::MAX),
                ..LedgerQuery::default()
            })
            .await?;
        Ok(entries.iter().map(|e| e.amount).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let ledger = ledger();
        let entry = LedgerEntry::new("w1", "0xabc", Decimal::new(25, 0))
            .with_purpose(Some("inference".into()));
        let id = ledger.record(&entry).await.unwrap();
        let loaded = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.wallet_id, "w1");
        assert_eq!(loaded.status, PaymentStatus::Pending);
        assert_eq!(loaded.purpose.as_deref(), Some("inference"));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let ledger = ledger();
        let entry = LedgerEntry::new("w1", "0xabc", Decimal::ONE);
        ledger.record(&entry).await.unwrap();

        let update = StatusUpdate::to(PaymentStatus::Completed)
            .with_metadata("note", json!("done"));
        let update = StatusUpdate {
            method: Some(PaymentMethod::Transfer),
            tx_hash: Some("0xhash".into()),
            ..update
        };
        assert!(ledger.update_status(&entry.id, update).await.unwrap());

        let loaded = ledger.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Completed);
        assert_eq!(loaded.method, Some(PaymentMethod::Transfer));
        assert_eq!(loaded.tx_hash.as_deref(), Some("0xhash"));
        assert_eq!(loaded.metadata.get("note"), Some(&json!("done")));
    }

    #[tokio::test]
    async fn test_terminal_status_is_write_once() {
        let ledger = ledger();
        let entry = LedgerEntry::new("w1", "0xabc", Decimal::ONE);
        ledger.record(&entry).await.unwrap();

        assert!(ledger
            .update_status(&entry.id, StatusUpdate::to(PaymentStatus::Failed))
            .await
            .unwrap());
        assert!(!ledger
            .update_status(&entry.id, StatusUpdate::to(PaymentStatus::Completed))
            .await
            .unwrap());

        let loaded = ledger.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_unknown_entry_returns_false() {
        let ledger = ledger();
        assert!(!ledger
            .update_status("missing", StatusUpdate::to(PaymentStatus::Failed))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_and_cap() {
        let ledger = ledger();
        for i in 0..5 {
            let mut entry = LedgerEntry::new("w1", "0xabc", Decimal::new(i, 0));
            entry.wallet_set_id = Some("set1".into());
            ledger.record(&entry).await.unwrap();
        }
        let other = LedgerEntry::new("w2", "0xdef", Decimal::ONE);
        ledger.record(&other).await.unwrap();

        let results = ledger
            .query(&LedgerQuery {
                wallet_id: Some("w1".into()),
                ..LedgerQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 5);

        let capped = ledger
            .query(&LedgerQuery {
                wallet_id: Some("w1".into()),
                limit: Some(2),
                ..LedgerQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);

        let by_set = ledger
            .query(&LedgerQuery {
                wallet_set_id: Some("set1".into()),
                ..LedgerQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_set.len(), 5);

        let by_status = ledger
            .query(&LedgerQuery {
                status: Some(PaymentStatus::Completed),
                ..LedgerQuery::default()
            })
            .await
            .unwrap();
        assert!(by_status.is_empty());
    }

    #[tokio::test]
    async fn test_total_spent_counts_completed_only() {
        let ledger = ledger();
        let a = LedgerEntry::new("w1", "r", Decimal::new(10, 0));
        let b = LedgerEntry::new("w1", "r", Decimal::new(7, 0));
        let c = LedgerEntry::new("w1", "r", Decimal::new(100, 0));
        for entry in [&a, &b, &c] {
            ledger.record(entry).await.unwrap();
        }
        ledger
            .update_status(&a.id, StatusUpdate::to(PaymentStatus::Completed))
            .await
            .unwrap();
        ledger
            .update_status(&b.id, StatusUpdate::to(PaymentStatus::Completed))
            .await
            .unwrap();
        ledger
            .update_status(&c.id, StatusUpdate::to(PaymentStatus::Failed))
            .await
            .unwrap();

        assert_eq!(ledger.total_spent("w1").await.unwrap(), Decimal::new(17, 0));
    }
}
