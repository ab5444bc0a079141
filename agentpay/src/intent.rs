//! Payment intents: two-phase (authorize/capture) payments.
//!
//! An intent is created in `requires-confirmation` with an active fund
//! reservation, so its amount counts against available balance until it
//! reaches a terminal state. Confirmation transitions through `processing`
//! and executes the payment; cancellation (explicit or by expiry) releases
//! the reservation.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::Storage;
use crate::timestamp::now_unix;
use crate::types::Metadata;

/// Default lifetime of an unconfirmed intent.
pub const DEFAULT_EXPIRY_SECS: u64 = 900;

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created; awaiting confirm or cancel.
    RequiresConfirmation,
    /// Confirm in progress.
    Processing,
    /// Executed successfully.
    Succeeded,
    /// Execution failed.
    Failed,
    /// Cancelled (explicitly or by expiry).
    Cancelled,
}

impl IntentStatus {
    /// Returns `true` once the intent can no longer transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A pre-authorized payment with a held reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Unique intent id.
    pub id: String,
    /// Source wallet.
    pub wallet_id: String,
    /// Payment recipient.
    pub recipient: String,
    /// Payment amount.
    pub amount: Decimal,
    /// Currency tag (informational; the core moves one stablecoin).
    pub currency: String,
    /// Lifecycle state.
    pub status: IntentStatus,
    /// Amount currently held in the reservation registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_amount: Option<Decimal>,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds after which confirm auto-cancels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Human-readable purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Why the intent was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Id of the pending ledger entry recorded at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl PaymentIntent {
    /// Returns `true` when the intent's expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Persistence for payment intents.
#[derive(Clone)]
pub struct IntentService {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for IntentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentService").finish_non_exhaustive()
    }
}

fn key_for(intent_id: &str) -> String {
    format!("intent:{intent_id}")
}

/// What to create an intent from.
#[derive(Debug, Clone)]
pub struct NewIntent {
    /// Source wallet.
    pub wallet_id: String,
    /// Payment recipient.
    pub recipient: String,
    /// Payment amount.
    pub amount: Decimal,
    /// Seconds until expiry; `None` applies [`DEFAULT_EXPIRY_SECS`].
    pub expires_in: Option<u64>,
    /// Human-readable purpose.
    pub purpose: Option<String>,
    /// Free-form metadata.
    pub metadata: Metadata,
}

impl IntentService {
    /// Creates a service over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persists a new intent in `requires-confirmation`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn create(&self, new: NewIntent) -> Result<PaymentIntent, PaymentError> {
        let now = now_unix();
        let intent = PaymentIntent {
            id: Uuid::new_v4().to_string(),
            wallet_id: new.wallet_id,
            recipient: new.recipient,
            amount: new.amount,
            currency: "USDC".to_owned(),
            status: IntentStatus::RequiresConfirmation,
            reserved_amount: None,
            created_at: now,
            expires_at: Some(now + new.expires_in.unwrap_or(DEFAULT_EXPIRY_SECS)),
            purpose: new.purpose,
            cancel_reason: None,
            ledger_entry_id: None,
            metadata: new.metadata,
        };
        self.save(&intent).await?;
        Ok(intent)
    }

    /// Persists the given intent state.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn save(&self, intent: &PaymentIntent) -> Result<(), PaymentError> {
        let value = serde_json::to_value(intent)
            .map_err(|e| PaymentError::Validation(format!("unserializable intent: {e}")))?;
        self.storage.put(&key_for(&intent.id), value).await?;
        Ok(())
    }

    /// Loads an intent by id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntent>, PaymentError> {
        let value = self.storage.get(&key_for(intent_id)).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Loads an intent, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::IntentNotFound`] for unknown ids.
    pub async fn require(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        self.get(intent_id)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(intent_id.to_owned()))
    }

    /// Transitions an intent's status.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::IntentNotFound`] for unknown ids.
    pub async fn set_status(
        &self,
        intent_id: &str,
        status: IntentStatus,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut intent = self.require(intent_id).await?;
        intent.status = status;
        self.save(&intent).await?;
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn service() -> IntentService {
        IntentService::new(Arc::new(MemoryStorage::new()))
    }

    fn new_intent(amount: i64) -> NewIntent {
        NewIntent {
            wallet_id: "w1".into(),
            recipient: "0xabc".into(),
            amount: Decimal::new(amount, 0),
            expires_in: None,
            purpose: None,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();
        let intent = service.create(new_intent(30)).await.unwrap();
        assert_eq!(intent.status, IntentStatus::RequiresConfirmation);
        assert!(intent.expires_at.is_some());

        let loaded = service.get(&intent.id).await.unwrap().unwrap();
        assert_eq!(loaded.amount, Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn test_require_unknown_fails() {
        let service = service();
        let err = service.require("missing").await.unwrap_err();
        assert_eq!(err.kind(), "intent_not_found");
    }

    #[tokio::test]
    async fn test_set_status() {
        let service = service();
        let intent = service.create(new_intent(30)).await.unwrap();
        let updated = service
            .set_status(&intent.id, IntentStatus::Processing)
            .await
            .unwrap();
        assert_eq!(updated.status, IntentStatus::Processing);
    }

    #[test]
    fn test_expiry() {
        let now = now_unix();
        let mut intent = PaymentIntent {
            id: "i".into(),
            wallet_id: "w".into(),
            recipient: "r".into(),
            amount: Decimal::ONE,
            currency: "USDC".into(),
            status: IntentStatus::RequiresConfirmation,
            reserved_amount: None,
            created_at: now,
            expires_at: Some(now + 60),
            purpose: None,
            cancel_reason: None,
            ledger_entry_id: None,
            metadata: Metadata::new(),
        };
        assert!(!intent.is_expired(now));
        assert!(intent.is_expired(now + 61));
        intent.expires_at = None;
        assert!(!intent.is_expired(now + 10_000));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!IntentStatus::RequiresConfirmation.is_terminal());
        assert!(!IntentStatus::Processing.is_terminal());
        assert!(IntentStatus::Succeeded.is_terminal());
        assert!(IntentStatus::Failed.is_terminal());
        assert!(IntentStatus::Cancelled.is_terminal());
    }
}
