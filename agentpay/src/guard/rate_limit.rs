//! Rate-limit guard: payment count caps per time bucket.
//!
//! Counts are kept in fixed time buckets (`rate:{scope}:{name}:{unit}:{bucket}`)
//! so that stale buckets simply expire. Reserve increments the bucket
//! atomically and reverses itself when the post-value exceeds the cap.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;
use crate::storage::{counter_value, Storage};
use crate::timestamp::now_unix;

use super::{Guard, GuardDecision, GuardScope, PaymentContext};

/// Per-unit payment count caps. At least one must be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimits {
    /// Max payments per minute.
    pub per_minute: Option<u32>,
    /// Max payments per hour.
    pub per_hour: Option<u32>,
    /// Max payments per day.
    pub per_day: Option<u32>,
}

const UNITS: &[(&str, u64)] = &[("minute", 60), ("hour", 3_600), ("day", 86_400)];

#[derive(Debug, Serialize, Deserialize)]
struct RateToken {
    buckets: Vec<String>,
}

/// Guard limiting how many payments run per time window.
pub struct RateLimitGuard {
    name: String,
    scope: GuardScope,
    limits: RateLimits,
    storage: Arc<dyn Storage>,
}

impl RateLimitGuard {
    /// Creates a rate-limit guard.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Configuration`] when no cap is set.
    pub fn new(
        storage: Arc<dyn Storage>,
        name: impl Into<String>,
        scope: GuardScope,
        limits: RateLimits,
    ) -> Result<Self, PaymentError> {
        if limits.per_minute.is_none() && limits.per_hour.is_none() && limits.per_day.is_none() {
            return Err(PaymentError::Configuration(
                "rate limit guard needs at least one limit".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            scope,
            limits,
            storage,
        })
    }

    fn limit_for(&self, unit: &str) -> Option<u32> {
        match unit {
            "minute" => self.limits.per_minute,
            "hour" => self.limits.per_hour,
            "day" => self.limits.per_day,
            _ => None,
        }
    }

    /// Active `(unit, bucket_key, limit)` triples for the current instant.
    fn active_buckets(&self, scope_id: &str, now: u64) -> Vec<(String, u32)> {
        UNITS
            .iter()
            .filter_map(|(unit, secs)| {
                self.limit_for(unit).map(|limit| {
                    let bucket = now / secs;
                    (
                        format!("rate:{scope_id}:{}:{unit}:{bucket}", self.name),
                        limit,
                    )
                })
            })
            .collect()
    }

    fn bucket_window(key: &str) -> std::time::Duration {
        // Buckets outlive their unit by one period so releases still find them.
        let secs = if key.contains(":minute:") {
            120
        } else if key.contains(":hour:") {
            7_200
        } else {
            172_800
        };
        std::time::Duration::from_secs(secs)
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        let scope_id = self.scope.id(ctx);
        for (key, limit) in self.active_buckets(scope_id, now_unix()) {
            let count = counter_value(self.storage.get(&key).await?.as_ref());
            if count >= Decimal::from(limit) {
                return Ok(GuardDecision::block(
                    &self.name,
                    format!("rate limit exceeded: {count}/{limit} in current window"),
                ));
            }
        }
        Ok(GuardDecision::allow(&self.name))
    }

    async fn reserve(&self, ctx: &PaymentContext) -> Result<Option<String>, PaymentError> {
        let scope_id = self.scope.id(ctx);
        let mut reserved: Vec<String> = Vec::new();

        for (key, limit) in self.active_buckets(scope_id, now_unix()) {
            let post = self
                .storage
                .atomic_add(&key, Decimal::ONE, Some(Self::bucket_window(&key)))
                .await?;
            if post > Decimal::from(limit) {
                self.storage.atomic_add(&key, -Decimal::ONE, None).await?;
                for prior in &reserved {
                    self.storage.atomic_add(prior, -Decimal::ONE, None).await?;
                }
                return Err(PaymentError::GuardBlocked {
                    guard: self.name.clone(),
                    reason: format!("rate limit exceeded: {limit} per window"),
                });
            }
            reserved.push(key);
        }

        let token = RateToken { buckets: reserved };
        Ok(Some(
            serde_json::to_string(&token).expect("rate token serializes"),
        ))
    }

    async fn release(&self, _ctx: &PaymentContext, token: &str) -> Result<(), PaymentError> {
        let Ok(token) = serde_json::from_str::<RateToken>(token) else {
            return Ok(());
        };
        for bucket in &token.buckets {
            self.storage.atomic_add(bucket, -Decimal::ONE, None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::testutil::ctx;
    use crate::storage::MemoryStorage;

    fn guard(per_minute: u32) -> RateLimitGuard {
        RateLimitGuard::new(
            Arc::new(MemoryStorage::new()),
            "rate_limit",
            GuardScope::Wallet,
            RateLimits {
                per_minute: Some(per_minute),
                ..RateLimits::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_requires_a_limit() {
        assert!(RateLimitGuard::new(
            Arc::new(MemoryStorage::new()),
            "r",
            GuardScope::Wallet,
            RateLimits::default()
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_reserve_blocks_past_cap() {
        let guard = guard(2);
        let c = ctx("w", "r", Decimal::ONE);
        guard.reserve(&c).await.unwrap();
        guard.reserve(&c).await.unwrap();
        let err = guard.reserve(&c).await.unwrap_err();
        assert!(matches!(err, PaymentError::GuardBlocked { .. }));
    }

    #[tokio::test]
    async fn test_release_frees_a_slot() {
        let guard = guard(1);
        let c = ctx("w", "r", Decimal::ONE);
        let token = guard.reserve(&c).await.unwrap().unwrap();
        assert!(guard.reserve(&c).await.is_err());
        guard.release(&c, &token).await.unwrap();
        assert!(guard.reserve(&c).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_does_not_consume() {
        let guard = guard(1);
        let c = ctx("w", "r", Decimal::ONE);
        for _ in 0..3 {
            assert!(guard.check(&c).await.unwrap().allowed);
        }
        assert!(guard.reserve(&c).await.is_ok());
        assert!(!guard.check(&c).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_failed_reserve_rolls_back_smaller_units() {
        let storage = Arc::new(MemoryStorage::new());
        let guard = RateLimitGuard::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "rate_limit",
            GuardScope::Wallet,
            RateLimits {
                per_minute: Some(10),
                per_hour: Some(1),
                ..RateLimits::default()
            },
        )
        .unwrap();
        let c = ctx("w", "r", Decimal::ONE);
        guard.reserve(&c).await.unwrap();
        assert!(guard.reserve(&c).await.is_err());

        // The minute bucket was rolled back along with the hour rejection:
        // only the first reserve is still counted.
        let bucket = now_unix() / 60;
        let key = format!("rate:w:rate_limit:minute:{bucket}");
        let count = counter_value(storage.get(&key).await.unwrap().as_ref());
        assert_eq!(count, Decimal::ONE);
    }
}
