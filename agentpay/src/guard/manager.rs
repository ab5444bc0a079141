//! Guard registration and persistence.
//!
//! Guard configurations are stored per wallet (`guards:wallet:{id}`) and per
//! wallet set (`guards:set:{id}`) so that every process sharing the storage
//! backend rebuilds the same chains. Capabilities (the confirmation
//! approver) are injected at rebuild time, never persisted.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::PaymentError;
use crate::storage::Storage;

use super::{
    Approver, BudgetGuard, BudgetLimits, ConfirmGuard, Guard, GuardChain, GuardScope,
    RateLimitGuard, RateLimits, RecipientGuard, SingleTxGuard,
};

/// Whitelist or blacklist behavior for [`RecipientGuard`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientMode {
    /// Only matching recipients are allowed.
    #[default]
    Whitelist,
    /// Matching recipients are blocked.
    Blacklist,
}

/// Serializable configuration for one guard instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardConfig {
    /// Windowed spending caps.
    Budget {
        /// Guard name.
        name: String,
        /// Rolling 24h cap.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        daily_limit: Option<Decimal>,
        /// Rolling 1h cap.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hourly_limit: Option<Decimal>,
        /// Lifetime cap.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_limit: Option<Decimal>,
    },
    /// Payment count caps.
    RateLimit {
        /// Guard name.
        name: String,
        /// Max payments per minute.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_minute: Option<u32>,
        /// Max payments per hour.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_hour: Option<u32>,
        /// Max payments per day.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_day: Option<u32>,
    },
    /// Per-payment amount bounds.
    SingleTx {
        /// Guard name.
        name: String,
        /// Maximum amount per payment.
        max_amount: Decimal,
        /// Minimum amount per payment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_amount: Option<Decimal>,
    },
    /// Recipient access control.
    Recipient {
        /// Guard name.
        name: String,
        /// Whitelist or blacklist.
        #[serde(default)]
        mode: RecipientMode,
        /// Exact address matches.
        #[serde(default)]
        addresses: Vec<String>,
        /// URL domain substrings.
        #[serde(default)]
        domains: Vec<String>,
        /// Regex patterns.
        #[serde(default)]
        patterns: Vec<String>,
    },
    /// External approval above a threshold.
    Confirm {
        /// Guard name.
        name: String,
        /// Amount at or above which approval is required.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<Decimal>,
        /// Require approval for every payment.
        #[serde(default)]
        always: bool,
    },
}

impl GuardConfig {
    /// The guard's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Budget { name, .. }
            | Self::RateLimit { name, .. }
            | Self::SingleTx { name, .. }
            | Self::Recipient { name, .. }
            | Self::Confirm { name, .. } => name,
        }
    }

    /// Builds the runtime guard for this configuration.
    fn build(
        &self,
        storage: Arc<dyn Storage>,
        scope: GuardScope,
        approver: Option<Arc<dyn Approver>>,
    ) -> Result<Arc<dyn Guard>, PaymentError> {
        let guard: Arc<dyn Guard> = match self {
            Self::Budget {
                name,
                daily_limit,
                hourly_limit,
                total_limit,
            } => Arc::new(BudgetGuard::new(
                storage,
                name.clone(),
                scope,
                BudgetLimits {
                    daily: *daily_limit,
                    hourly: *hourly_limit,
                    lifetime: *total_limit,
                },
            )?),
            Self::RateLimit {
                name,
                per_minute,
                per_hour,
                per_day,
            } => Arc::new(RateLimitGuard::new(
                storage,
                name.clone(),
                scope,
                RateLimits {
                    per_minute: *per_minute,
                    per_hour: *per_hour,
                    per_day: *per_day,
                },
            )?),
            Self::SingleTx {
                name,
                max_amount,
                min_amount,
            } => Arc::new(SingleTxGuard::new(name.clone(), *max_amount, *min_amount)),
            Self::Recipient {
                name,
                mode,
                addresses,
                domains,
                patterns,
            } => Arc::new(RecipientGuard::new(
                name.clone(),
                *mode,
                addresses,
                domains,
                patterns,
            )?),
            Self::Confirm {
                name,
                threshold,
                always,
            } => Arc::new(ConfirmGuard::new(
                name.clone(),
                *threshold,
                *always,
                approver,
            )),
        };
        Ok(guard)
    }
}

fn parse_configs(value: Option<Value>) -> Vec<GuardConfig> {
    value
        .and_then(|v| v.get("guards").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Persists guard configurations and rebuilds chains on demand.
#[derive(Clone)]
pub struct GuardManager {
    storage: Arc<dyn Storage>,
    approver: Option<Arc<dyn Approver>>,
}

impl std::fmt::Debug for GuardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardManager")
            .field("approver", &self.approver.is_some())
            .finish_non_exhaustive()
    }
}

fn wallet_key(wallet_id: &str) -> String {
    format!("guards:wallet:{wallet_id}")
}

fn set_key(wallet_set_id: &str) -> String {
    format!("guards:set:{wallet_set_id}")
}

impl GuardManager {
    /// Creates a manager over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, approver: Option<Arc<dyn Approver>>) -> Self {
        Self { storage, approver }
    }

    async fn append(&self, key: &str, config: GuardConfig) -> Result<(), PaymentError> {
        self.storage
            .update(
                key,
                Box::new(move |current| {
                    let mut configs = parse_configs(current);
                    // Re-adding a name replaces the old configuration.
                    configs.retain(|c| c.name() != config.name());
                    configs.push(config.clone());
                    Some(json!({ "guards": configs }))
                }),
            )
            .await?;
        Ok(())
    }

    async fn remove_named(&self, key: &str, name: &str) -> Result<bool, PaymentError> {
        use std::sync::atomic::{AtomicBool, Ordering};

        let removed = Arc::new(AtomicBool::new(false));
        let removed_in_mutator = Arc::clone(&removed);
        let name = name.to_owned();
        self.storage
            .update(
                key,
                Box::new(move |current| {
                    let mut configs = parse_configs(current);
                    let before = configs.len();
                    configs.retain(|c| c.name() != name);
                    removed_in_mutator.store(configs.len() < before, Ordering::SeqCst);
                    Some(json!({ "guards": configs }))
                }),
            )
            .await?;
        Ok(removed.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn configs_at(&self, key: &str) -> Result<Vec<GuardConfig>, PaymentError> {
        Ok(parse_configs(self.storage.get(key).await?))
    }

    /// Registers a guard for a wallet. Re-adding a name replaces it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn add(&self, wallet_id: &str, config: GuardConfig) -> Result<(), PaymentError> {
        debug!(wallet_id, guard = config.name(), "registering wallet guard");
        self.append(&wallet_key(wallet_id), config).await
    }

    /// Registers a guard for a wallet set (applies to every wallet in it).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn add_for_set(
        &self,
        wallet_set_id: &str,
        config: GuardConfig,
    ) -> Result<(), PaymentError> {
        debug!(wallet_set_id, guard = config.name(), "registering set guard");
        self.append(&set_key(wallet_set_id), config).await
    }

    /// Removes a wallet guard by name. Returns `true` if one was removed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn remove(&self, wallet_id: &str, name: &str) -> Result<bool, PaymentError> {
        self.remove_named(&wallet_key(wallet_id), name).await
    }

    /// Removes a wallet-set guard by name. Returns `true` if one was removed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn remove_from_set(
        &self,
        wallet_set_id: &str,
        name: &str,
    ) -> Result<bool, PaymentError> {
        self.remove_named(&set_key(wallet_set_id), name).await
    }

    /// Lists a wallet's guard configurations.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self, wallet_id: &str) -> Result<Vec<GuardConfig>, PaymentError> {
        self.configs_at(&wallet_key(wallet_id)).await
    }

    /// Lists a wallet set's guard configurations.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_for_set(&self, wallet_set_id: &str) -> Result<Vec<GuardConfig>, PaymentError> {
        self.configs_at(&set_key(wallet_set_id)).await
    }

    /// Builds the effective chain for a payment: the wallet-set chain
    /// followed by the wallet chain.
    ///
    /// # Errors
    ///
    /// Propagates storage failures and configuration errors.
    pub async fn chain_for(
        &self,
        wallet_id: &str,
        wallet_set_id: Option<&str>,
    ) -> Result<GuardChain, PaymentError> {
        let mut chain = GuardChain::new();
        if let Some(set_id) = wallet_set_id {
            for config in self.configs_at(&set_key(set_id)).await? {
                chain.push(config.build(
                    Arc::clone(&self.storage),
                    GuardScope::WalletSet,
                    self.approver.clone(),
                )?);
            }
        }
        for config in self.configs_at(&wallet_key(wallet_id)).await? {
            chain.push(config.build(
                Arc::clone(&self.storage),
                GuardScope::Wallet,
                self.approver.clone(),
            )?);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::testutil::ctx;
    use crate::storage::MemoryStorage;

    fn manager() -> GuardManager {
        GuardManager::new(Arc::new(MemoryStorage::new()), None)
    }

    fn budget(name: &str, daily: i64) -> GuardConfig {
        GuardConfig::Budget {
            name: name.into(),
            daily_limit: Some(Decimal::new(daily, 0)),
            hourly_limit: None,
            total_limit: None,
        }
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let manager = manager();
        manager.add("w1", budget("budget", 50)).await.unwrap();
        manager
            .add(
                "w1",
                GuardConfig::SingleTx {
                    name: "single_tx".into(),
                    max_amount: Decimal::new(10, 0),
                    min_amount: None,
                },
            )
            .await
            .unwrap();

        let names: Vec<String> = manager
            .list("w1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.name().to_owned())
            .collect();
        assert_eq!(names, vec!["budget", "single_tx"]);

        assert!(manager.remove("w1", "budget").await.unwrap());
        assert!(!manager.remove("w1", "budget").await.unwrap());
        assert_eq!(manager.list("w1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_re_adding_a_name_replaces() {
        let manager = manager();
        manager.add("w1", budget("budget", 50)).await.unwrap();
        manager.add("w1", budget("budget", 75)).await.unwrap();

        let configs = manager.list("w1").await.unwrap();
        assert_eq!(configs.len(), 1);
        match &configs[0] {
            GuardConfig::Budget { daily_limit, .. } => {
                assert_eq!(*daily_limit, Some(Decimal::new(75, 0)));
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chain_merges_set_then_wallet() {
        let manager = manager();
        manager
            .add_for_set("team", budget("team_budget", 100))
            .await
            .unwrap();
        manager.add("w1", budget("budget", 50)).await.unwrap();

        let chain = manager.chain_for("w1", Some("team")).await.unwrap();
        assert_eq!(chain.names(), vec!["team_budget", "budget"]);

        let wallet_only = manager.chain_for("w1", None).await.unwrap();
        assert_eq!(wallet_only.names(), vec!["budget"]);
    }

    #[tokio::test]
    async fn test_rebuilt_chain_enforces() {
        let manager = manager();
        manager.add("w1", budget("budget", 50)).await.unwrap();

        let chain = manager.chain_for("w1", None).await.unwrap();
        chain
            .reserve(&ctx("w1", "r", Decimal::new(40, 0)))
            .await
            .unwrap();

        // A freshly rebuilt chain sees the same usage through storage.
        let chain2 = manager.chain_for("w1", None).await.unwrap();
        assert!(chain2
            .reserve(&ctx("w1", "r", Decimal::new(20, 0)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_configs_roundtrip_serde() {
        let configs = vec![
            budget("budget", 50),
            GuardConfig::Recipient {
                name: "recipient".into(),
                mode: RecipientMode::Blacklist,
                addresses: vec!["0xdead".into()],
                domains: vec!["bad.example".into()],
                patterns: vec!["^https://bad".into()],
            },
            GuardConfig::Confirm {
                name: "confirm".into(),
                threshold: Some(Decimal::new(100, 0)),
                always: false,
            },
        ];
        let value = serde_json::to_value(&configs).unwrap();
        let back: Vec<GuardConfig> = serde_json::from_value(value).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[1].name(), "recipient");
    }
}
