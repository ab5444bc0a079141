//! Per-wallet fund lock.
//!
//! A coarse mutex that serializes payment execution per wallet, preventing
//! double-spend races between concurrent callers sharing a wallet. The
//! holder receives an opaque token; release is only honored when the
//! presented token matches the stored one, so a late caller cannot unlock a
//! lock now owned by someone else. The ttl bounds the blast radius of a
//! crashed holder.
//!
//! A payment acquires exactly one wallet lock, so deadlock is structurally
//! impossible. Acquisition order is not fair; starvation is mitigated only
//! by the retry count.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::Storage;

/// Tuning for [`FundLock::acquire_with`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long an unreleased lock is honored.
    pub ttl: Duration,
    /// Additional acquisition attempts after the first.
    pub retries: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Per-wallet mutex with caller-owned release tokens.
#[derive(Clone)]
pub struct FundLock {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for FundLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundLock").finish_non_exhaustive()
    }
}

fn key_for(wallet_id: &str) -> String {
    format!("lock:{wallet_id}")
}

impl FundLock {
    /// Creates a lock service over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Acquires the wallet lock with default options.
    ///
    /// Returns the holder token, or `None` when every attempt found the
    /// lock held.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn acquire(&self, wallet_id: &str) -> Result<Option<String>, PaymentError> {
        self.acquire_with(wallet_id, LockOptions::default()).await
    }

    /// Acquires the wallet lock with explicit options.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn acquire_with(
        &self,
        wallet_id: &str,
        options: LockOptions,
    ) -> Result<Option<String>, PaymentError> {
        let key = key_for(wallet_id);
        let token = Uuid::new_v4().to_string();

        for attempt in 0..=options.retries {
            if self.storage.acquire_lock(&key, &token, options.ttl).await? {
                debug!(wallet_id, attempt, "fund lock acquired");
                return Ok(Some(token));
            }
            if attempt < options.retries {
                tokio::time::sleep(options.backoff).await;
            }
        }

        warn!(
            wallet_id,
            retries = options.retries,
            "fund lock not acquired"
        );
        Ok(None)
    }

    /// Releases the lock iff `token` matches the stored holder token.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn release_with_key(
        &self,
        wallet_id: &str,
        token: &str,
    ) -> Result<bool, PaymentError> {
        let released = self
            .storage
            .release_lock(&key_for(wallet_id), token)
            .await?;
        if released {
            debug!(wallet_id, "fund lock released");
        } else {
            warn!(wallet_id, "fund lock release refused (token mismatch or expired)");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn lock() -> FundLock {
        FundLock::new(Arc::new(MemoryStorage::new()))
    }

    fn fast_options() -> LockOptions {
        LockOptions {
            ttl: Duration::from_secs(30),
            retries: 1,
            backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = lock();
        let token = lock.acquire("w1").await.unwrap().unwrap();
        assert!(lock.release_with_key("w1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_held_lock_blocks_second_caller() {
        let lock = lock();
        let _token = lock.acquire_with("w1", fast_options()).await.unwrap().unwrap();
        assert!(lock.acquire_with("w1", fast_options()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_token_never_releases() {
        let lock = lock();
        let token = lock.acquire("w1").await.unwrap().unwrap();
        assert!(!lock.release_with_key("w1", "not-the-token").await.unwrap());
        // Still held by the original token.
        assert!(lock.release_with_key("w1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_different_wallets_are_independent() {
        let lock = lock();
        let a = lock.acquire("w1").await.unwrap();
        let b = lock.acquire("w2").await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry_allows_takeover_and_rejects_stale_release() {
        let lock = lock();
        let options = LockOptions {
            ttl: Duration::from_millis(20),
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        let stale = lock.acquire_with("w1", options).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = lock.acquire_with("w1", fast_options()).await.unwrap().unwrap();
        assert!(!lock.release_with_key("w1", &stale).await.unwrap());
        assert!(lock.release_with_key("w1", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_wins_after_release() {
        let lock = Arc::new(lock());
        let token = lock.acquire("w1").await.unwrap().unwrap();

        let contender = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.acquire_with(
                    "w1",
                    LockOptions {
                        ttl: Duration::from_secs(30),
                        retries: 20,
                        backoff: Duration::from_millis(10),
                    },
                )
                .await
                .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        lock.release_with_key("w1", &token).await.unwrap();

        assert!(contender.await.unwrap().is_some());
    }
}
