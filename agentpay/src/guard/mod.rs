//! Spending guards.
//!
//! Guards are policy checks composed into a per-wallet chain (and,
//! independently, a per-wallet-set chain). Each guard supports four
//! operations:
//!
//! - `check` — read-only predicate, used for simulation
//! - `reserve` — atomically tests limits and records usage as pending,
//!   returning an opaque token
//! - `commit` — finalizes the pending usage (a no-op for guards that
//!   already counted it at reserve time)
//! - `release` — rolls the pending usage back
//!
//! A chain's `reserve` runs guards in order; on any failure it releases the
//! tokens obtained so far and propagates the block reason. For any single
//! guard, the predicate and the counter mutation are inseparable: N
//! concurrent payments of amount `a` against a limit `L` admit exactly
//! `⌊L/a⌋`, regardless of arrival order.
//!
//! Five guard kinds ship with the crate: [`BudgetGuard`], [`RateLimitGuard`],
//! [`SingleTxGuard`], [`RecipientGuard`], and [`ConfirmGuard`].
//! [`GuardManager`] persists their configurations per wallet / wallet-set.

mod budget;
mod confirm;
mod manager;
mod rate_limit;
mod recipient;
mod single_tx;

pub use budget::{BudgetGuard, BudgetLimits};
pub use confirm::{Approver, ConfirmGuard};
pub use manager::{GuardConfig, GuardManager, RecipientMode};
pub use rate_limit::{RateLimitGuard, RateLimits};
pub use recipient::RecipientGuard;
pub use single_tx::SingleTxGuard;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::PaymentError;
use crate::types::Metadata;

/// Everything a guard can see about the payment under evaluation.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    /// Source wallet.
    pub wallet_id: String,
    /// Wallet set, when the wallet belongs to one.
    pub wallet_set_id: Option<String>,
    /// Payment recipient.
    pub recipient: String,
    /// Payment amount.
    pub amount: Decimal,
    /// Human-readable purpose.
    pub purpose: Option<String>,
    /// Request metadata.
    pub metadata: Metadata,
}

/// Which identifier a stateful guard keys its counters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardScope {
    /// Key by wallet id (guards attached to a wallet).
    Wallet,
    /// Key by wallet-set id (guards attached to a set).
    WalletSet,
}

impl GuardScope {
    /// Resolves the scope id for a context. Set-scoped guards fall back to
    /// the wallet id when the context carries no set.
    #[must_use]
    pub fn id<'a>(&self, ctx: &'a PaymentContext) -> &'a str {
        match self {
            Self::Wallet => &ctx.wallet_id,
            Self::WalletSet => ctx.wallet_set_id.as_deref().unwrap_or(&ctx.wallet_id),
        }
    }
}

/// Outcome of a read-only guard check.
#[derive(Debug, Clone)]
pub struct GuardDecision {
    /// Whether the payment is allowed.
    pub allowed: bool,
    /// Name of the deciding guard.
    pub guard: String,
    /// Why it was rejected; `None` when allowed.
    pub reason: Option<String>,
}

impl GuardDecision {
    /// An allow decision.
    #[must_use]
    pub fn allow(guard: impl Into<String>) -> Self {
        Self {
            allowed: true,
            guard: guard.into(),
            reason: None,
        }
    }

    /// A block decision with a reason.
    #[must_use]
    pub fn block(guard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            guard: guard.into(),
            reason: Some(reason.into()),
        }
    }

    /// Converts a block decision into the corresponding error.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::GuardBlocked`] when the decision is a block.
    pub fn into_result(self) -> Result<(), PaymentError> {
        if self.allowed {
            Ok(())
        } else {
            Err(PaymentError::GuardBlocked {
                guard: self.guard,
                reason: self.reason.unwrap_or_default(),
            })
        }
    }
}

/// A single policy check.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Unique name within its chain (e.g. `"budget"`).
    fn name(&self) -> &str;

    /// Read-only predicate; must not mutate any counter.
    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError>;

    /// Atomically tests limits and records pending usage.
    ///
    /// Stateless guards simply run [`Guard::check`] and return no token.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::GuardBlocked`] when the guard rejects.
    async fn reserve(&self, ctx: &PaymentContext) -> Result<Option<String>, PaymentError> {
        self.check(ctx).await?.into_result()?;
        Ok(None)
    }

    /// Finalizes a reservation. Most guards no-op because reserve already
    /// counted the usage.
    async fn commit(&self, _ctx: &PaymentContext, _token: &str) -> Result<(), PaymentError> {
        Ok(())
    }

    /// Rolls a reservation back.
    async fn release(&self, _ctx: &PaymentContext, _token: &str) -> Result<(), PaymentError> {
        Ok(())
    }
}

/// A guard's share of a chain reservation.
#[derive(Debug, Clone)]
pub struct GuardReservation {
    /// Name of the reserving guard.
    pub guard: String,
    /// Opaque token to pass back to commit/release; `None` for stateless
    /// guards.
    pub token: Option<String>,
}

/// Ordered composition of guards.
///
/// The effective chain for a payment is the wallet-set chain followed by
/// the wallet chain.
#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl std::fmt::Debug for GuardChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardChain")
            .field("guards", &self.names())
            .finish()
    }
}

impl GuardChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a guard.
    pub fn push(&mut self, guard: Arc<dyn Guard>) {
        self.guards.push(guard);
    }

    /// Appends every guard from another chain.
    pub fn extend(&mut self, other: GuardChain) {
        self.guards.extend(other.guards);
    }

    /// Number of guards in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// `true` when the chain holds no guards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Names of all guards, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.guards.iter().map(|g| g.name().to_owned()).collect()
    }

    /// Runs read-only checks in order, stopping at the first block.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from individual guards.
    pub async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        for guard in &self.guards {
            let decision = guard.check(ctx).await?;
            if !decision.allowed {
                return Ok(decision);
            }
        }
        Ok(GuardDecision::allow("chain"))
    }

    /// Runs every guard's check and returns all decisions (for simulation).
    ///
    /// # Errors
    ///
    /// Propagates storage failures from individual guards.
    pub async fn check_all(&self, ctx: &PaymentContext) -> Result<Vec<GuardDecision>, PaymentError> {
        let mut decisions = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            decisions.push(guard.check(ctx).await?);
        }
        Ok(decisions)
    }

    /// Reserves every guard in order.
    ///
    /// On failure, tokens obtained so far are released (in reverse order)
    /// before the block reason propagates.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::GuardBlocked`] from the rejecting guard, or a
    /// storage failure.
    pub async fn reserve(&self, ctx: &PaymentContext) -> Result<Vec<GuardReservation>, PaymentError> {
        let mut reservations: Vec<GuardReservation> = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            match guard.reserve(ctx).await {
                Ok(token) => reservations.push(GuardReservation {
                    guard: guard.name().to_owned(),
                    token,
                }),
                Err(err) => {
                    debug!(guard = guard.name(), %err, "guard rejected, rolling back chain");
                    self.release(ctx, &reservations).await;
                    return Err(err);
                }
            }
        }
        Ok(reservations)
    }

    /// Commits the whole token set. Individual failures are logged, not
    /// propagated: the payment already happened.
    pub async fn commit(&self, ctx: &PaymentContext, reservations: &[GuardReservation]) {
        for reservation in reservations {
            let Some(token) = &reservation.token else {
                continue;
            };
            if let Some(guard) = self.find(&reservation.guard) {
                if let Err(err) = guard.commit(ctx, token).await {
                    warn!(guard = %reservation.guard, %err, "guard commit failed");
                }
            }
        }
    }

    /// Releases the whole token set, newest first. Individual failures are
    /// logged, not propagated.
    pub async fn release(&self, ctx: &PaymentContext, reservations: &[GuardReservation]) {
        for reservation in reservations.iter().rev() {
            let Some(token) = &reservation.token else {
                continue;
            };
            if let Some(guard) = self.find(&reservation.guard) {
                if let Err(err) = guard.release(ctx, token).await {
                    warn!(guard = %reservation.guard, %err, "guard release failed");
                }
            }
        }
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Guard>> {
        self.guards.iter().find(|g| g.name() == name)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Context for a plain wallet payment.
    pub fn ctx(wallet_id: &str, recipient: &str, amount: Decimal) -> PaymentContext {
        PaymentContext {
            wallet_id: wallet_id.to_owned(),
            wallet_set_id: None,
            recipient: recipient.to_owned(),
            amount,
            purpose: None,
            metadata: Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::ctx;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Guard that counts reserve/release calls and optionally blocks.
    struct Probe {
        name: String,
        block: bool,
        reserved: AtomicUsize,
        released: AtomicUsize,
    }

    impl Probe {
        fn new(name: &str, block: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                block,
                reserved: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Guard for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(&self, _ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
            if self.block {
                Ok(GuardDecision::block(&self.name, "blocked by probe"))
            } else {
                Ok(GuardDecision::allow(&self.name))
            }
        }

        async fn reserve(&self, ctx: &PaymentContext) -> Result<Option<String>, PaymentError> {
            self.check(ctx).await?.into_result()?;
            self.reserved.fetch_add(1, Ordering::SeqCst);
            Ok(Some("token".into()))
        }

        async fn release(&self, _ctx: &PaymentContext, _token: &str) -> Result<(), PaymentError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reserve_rolls_back_on_failure() {
        let first = Probe::new("first", false);
        let second = Probe::new("second", false);
        let blocker = Probe::new("blocker", true);

        let mut chain = GuardChain::new();
        chain.push(first.clone());
        chain.push(second.clone());
        chain.push(blocker);

        let err = chain
            .reserve(&ctx("w", "r", Decimal::ONE))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::GuardBlocked { ref guard, .. } if guard == "blocker"));
        assert_eq!(first.reserved.load(Ordering::SeqCst), 1);
        assert_eq!(first.released.load(Ordering::SeqCst), 1);
        assert_eq!(second.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reserve_success_returns_all_tokens() {
        let mut chain = GuardChain::new();
        chain.push(Probe::new("a", false));
        chain.push(Probe::new("b", false));

        let reservations = chain.reserve(&ctx("w", "r", Decimal::ONE)).await.unwrap();
        assert_eq!(reservations.len(), 2);
        assert!(reservations.iter().all(|r| r.token.is_some()));
    }

    #[tokio::test]
    async fn test_check_stops_at_first_block() {
        let mut chain = GuardChain::new();
        chain.push(Probe::new("ok", false));
        chain.push(Probe::new("no", true));
        chain.push(Probe::new("unreached", true));

        let decision = chain.check(&ctx("w", "r", Decimal::ONE)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.guard, "no");
    }

    #[tokio::test]
    async fn test_empty_chain_allows() {
        let chain = GuardChain::new();
        let decision = chain.check(&ctx("w", "r", Decimal::ONE)).await.unwrap();
        assert!(decision.allowed);
    }
}
