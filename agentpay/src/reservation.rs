//! Fund reservations for open payment intents.
//!
//! Separate from guard reservations (which are counter-based): this
//! registry records the amount each open intent holds against a wallet, so
//! the pipeline can compute `available = balance - total_for(wallet)`.
//!
//! The per-wallet aggregate (`reservation_total:{wallet}`) is maintained
//! atomically alongside the per-intent entries: the per-intent create/delete
//! decides (atomically) whether the aggregate moves, so double-reserves and
//! double-releases cannot skew it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PaymentError;
use crate::storage::{counter_value, Storage};
use crate::timestamp::now_unix;

/// A single fund hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Wallet the funds are held against.
    pub wallet_id: String,
    /// Held amount.
    pub amount: Decimal,
    /// Owning intent.
    pub intent_id: String,
    /// Unix seconds at creation.
    pub created_at: u64,
}

/// Tracks amounts reserved by open intents per wallet.
#[derive(Clone)]
pub struct ReservationRegistry {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ReservationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationRegistry").finish_non_exhaustive()
    }
}

fn entry_key(intent_id: &str) -> String {
    format!("reservation:{intent_id}")
}

fn total_key(wallet_id: &str) -> String {
    format!("reservation_total:{wallet_id}")
}

impl ReservationRegistry {
    /// Creates a registry over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Holds `amount` against `wallet_id` on behalf of `intent_id`.
    ///
    /// Idempotent: a second reserve with the same intent id leaves both the
    /// entry and the aggregate untouched.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn reserve(
        &self,
        wallet_id: &str,
        amount: Decimal,
        intent_id: &str,
    ) -> Result<(), PaymentError> {
        let created = Arc::new(AtomicBool::new(false));
        let created_in_mutator = Arc::clone(&created);
        let reservation = Reservation {
            wallet_id: wallet_id.to_owned(),
            amount,
            intent_id: intent_id.to_owned(),
            created_at: now_unix(),
        };
        self.storage
            .update(
                &entry_key(intent_id),
                Box::new(move |current| match current {
                    Some(existing) => {
                        created_in_mutator.store(false, Ordering::SeqCst);
                        Some(existing)
                    }
                    None => {
                        created_in_mutator.store(true, Ordering::SeqCst);
                        serde_json::to_value(&reservation).ok()
                    }
                }),
            )
            .await?;

        if created.load(Ordering::SeqCst) {
            self.storage
                .atomic_add(&total_key(wallet_id), amount, None)
                .await?;
            debug!(wallet_id, intent_id, %amount, "funds reserved");
        }
        Ok(())
    }

    /// Releases the hold owned by `intent_id`. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn release(&self, intent_id: &str) -> Result<bool, PaymentError> {
        let removed: Arc<Mutex<Option<Reservation>>> = Arc::new(Mutex::new(None));
        let removed_in_mutator = Arc::clone(&removed);
        self.storage
            .update(
                &entry_key(intent_id),
                Box::new(move |current| {
                    *removed_in_mutator.lock().expect("reservation lock") =
                        current.and_then(|v| serde_json::from_value(v).ok());
                    None
                }),
            )
            .await?;

        let reservation = removed.lock().expect("reservation lock").take();
        match reservation {
            Some(reservation) => {
                self.storage
                    .atomic_add(&total_key(&reservation.wallet_id), -reservation.amount, None)
                    .await?;
                debug!(
                    wallet_id = %reservation.wallet_id,
                    intent_id,
                    amount = %reservation.amount,
                    "reservation released"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the hold owned by `intent_id`, if any.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get(&self, intent_id: &str) -> Result<Option<Reservation>, PaymentError> {
        let value = self.storage.get(&entry_key(intent_id)).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Sum of all open holds against `wallet_id`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn total_for(&self, wallet_id: &str) -> Result<Decimal, PaymentError> {
        let total = counter_value(self.storage.get(&total_key(wallet_id)).await?.as_ref());
        // The aggregate can only drift negative through manual key edits;
        // clamp so availability math stays sane.
        Ok(total.max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn registry() -> ReservationRegistry {
        ReservationRegistry::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_reserve_and_total() {
        let registry = registry();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        registry.reserve("w1", Decimal::new(20, 0), "i2").await.unwrap();
        assert_eq!(registry.total_for("w1").await.unwrap(), Decimal::new(50, 0));
        assert_eq!(registry.total_for("w2").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_intent() {
        let registry = registry();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        registry.reserve("w1", Decimal::new(99, 0), "i1").await.unwrap();
        assert_eq!(registry.total_for("w1").await.unwrap(), Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn test_release_restores_total_exactly() {
        let registry = registry();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        let before = registry.total_for("w1").await.unwrap();
        registry.reserve("w1", Decimal::new(20, 0), "i2").await.unwrap();
        assert!(registry.release("i2").await.unwrap());
        assert_eq!(registry.total_for("w1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let registry = registry();
        assert!(!registry.release("missing").await.unwrap());
        assert_eq!(registry.total_for("w1").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_double_release_does_not_double_subtract() {
        let registry = registry();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        assert!(registry.release("i1").await.unwrap());
        assert!(!registry.release("i1").await.unwrap());
        assert_eq!(registry.total_for("w1").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_get_returns_hold() {
        let registry = registry();
        registry.reserve("w1", Decimal::new(30, 0), "i1").await.unwrap();
        let held = registry.get("i1").await.unwrap().unwrap();
        assert_eq!(held.wallet_id, "w1");
        assert_eq!(held.amount, Decimal::new(30, 0));
        assert!(registry.get("i2").await.unwrap().is_none());
    }
}
