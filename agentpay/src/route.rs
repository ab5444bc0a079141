//! Payment routing.
//!
//! The router classifies a request and selects exactly one adapter. Each
//! adapter answers `supports`, estimates via `simulate` (no fund movement,
//! no irreversible counterparty effect), and executes via `execute`.
//!
//! Priorities are tie-breakers, sorted ascending, chosen so the more
//! specific match wins: HTTP-402 (10) before cross-chain (30) before direct
//! transfer (50). The cross-chain rule — destination network set and
//! different from the wallet's — is encoded in each adapter's `supports`:
//! transfer and HTTP-402 decline such requests, so the cross-chain adapter
//! wins regardless of recipient shape.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PaymentError;
use crate::network::Network;
use crate::types::{FeeLevel, Metadata, PaymentMethod, PaymentResult, WalletInfo};

/// Routing priority of the HTTP-402 adapter.
pub const PRIORITY_X402: u8 = 10;
/// Routing priority of the cross-chain adapter.
pub const PRIORITY_CROSS_CHAIN: u8 = 30;
/// Routing priority of the direct transfer adapter.
pub const PRIORITY_TRANSFER: u8 = 50;

/// Everything an adapter needs to execute one payment.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// Resolved source wallet.
    pub wallet: WalletInfo,
    /// Recipient as given by the caller.
    pub recipient: String,
    /// Amount in whole tokens.
    pub amount: Decimal,
    /// Fee level hint.
    pub fee_level: FeeLevel,
    /// Exactly-once key forwarded to the custody provider.
    pub idempotency_key: String,
    /// Destination network for cross-chain intents.
    pub destination_network: Option<Network>,
    /// Human-readable purpose.
    pub purpose: Option<String>,
    /// Caller deadline; bounds adapter-side polling.
    pub timeout: Option<Duration>,
    /// Wait for on-chain confirmation before returning.
    pub wait_for_confirmation: bool,
    /// Prefer the fast cross-chain finality mode.
    pub fast_transfer: bool,
    /// Request metadata.
    pub metadata: Metadata,
}

impl AdapterRequest {
    /// `true` when the destination network is set and differs from the
    /// wallet's network.
    #[must_use]
    pub fn is_cross_network(&self) -> bool {
        self.destination_network
            .is_some_and(|dest| dest != self.wallet.network)
    }
}

/// What an adapter predicts about a payment, without executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSimulation {
    /// Whether execution would be attempted.
    pub would_succeed: bool,
    /// The simulating adapter's method.
    pub route: PaymentMethod,
    /// Estimated fee, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<Decimal>,
    /// Why execution would fail, when it would.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdapterSimulation {
    /// A passing simulation.
    #[must_use]
    pub const fn ok(route: PaymentMethod) -> Self {
        Self {
            would_succeed: true,
            route,
            estimated_fee: None,
            reason: None,
        }
    }

    /// A failing simulation with a reason.
    #[must_use]
    pub fn fail(route: PaymentMethod, reason: impl Into<String>) -> Self {
        Self {
            would_succeed: false,
            route,
            estimated_fee: None,
            reason: Some(reason.into()),
        }
    }
}

/// A transport-specific payment executor.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The transport this adapter implements.
    fn method(&self) -> PaymentMethod;

    /// Routing tie-breaker; lower sorts first.
    fn priority(&self) -> u8 {
        100
    }

    /// Whether this adapter can handle the request.
    fn supports(&self, request: &AdapterRequest) -> bool;

    /// Predicts the outcome without moving funds or causing irreversible
    /// side effects on the counterparty.
    async fn simulate(&self, request: &AdapterRequest) -> Result<AdapterSimulation, PaymentError>;

    /// Executes the payment. Business rejections come back as a
    /// non-success [`PaymentResult`]; infrastructure failures as errors
    /// (transient ones retryable).
    async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError>;
}

/// Priority-ordered adapter registry.
#[derive(Clone, Default)]
pub struct Router {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<PaymentMethod> = self.adapters.iter().map(|a| a.method()).collect();
        f.debug_struct("Router").field("adapters", &methods).finish()
    }
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, keeping the registry priority-sorted.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.priority());
    }

    /// All registered adapters, in priority order.
    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Selects the adapter for a request.
    #[must_use]
    pub fn find(&self, request: &AdapterRequest) -> Option<&Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.supports(request))
    }

    /// The transport that would handle a request, if any.
    #[must_use]
    pub fn detect_method(&self, request: &AdapterRequest) -> Option<PaymentMethod> {
        self.find(request).map(|a| a.method())
    }

    /// Routes and executes.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::RoutingFailed`] when no adapter matches, and
    /// propagates adapter errors.
    pub async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError> {
        let adapter = self
            .find(request)
            .ok_or_else(|| PaymentError::RoutingFailed(request.recipient.clone()))?;
        debug!(method = ?adapter.method(), recipient = %request.recipient, "routing payment");
        adapter.execute(request).await
    }

    /// Routes and simulates.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::RoutingFailed`] when no adapter matches, and
    /// propagates adapter errors.
    pub async fn simulate(
        &self,
        request: &AdapterRequest,
    ) -> Result<AdapterSimulation, PaymentError> {
        let adapter = self
            .find(request)
            .ok_or_else(|| PaymentError::RoutingFailed(request.recipient.clone()))?;
        adapter.simulate(request).await
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::types::Metadata;

    /// A minimal adapter request against a Base wallet.
    pub fn request(recipient: &str, amount: Decimal) -> AdapterRequest {
        AdapterRequest {
            wallet: WalletInfo {
                id: "w1".into(),
                address: format!("0x{}", "1".repeat(40)),
                wallet_set_id: None,
                network: Network::BaseSepolia,
                frozen: false,
            },
            recipient: recipient.to_owned(),
            amount,
            fee_level: FeeLevel::Medium,
            idempotency_key: "idem-1".into(),
            destination_network: None,
            purpose: None,
            timeout: None,
            wait_for_confirmation: false,
            fast_transfer: true,
            metadata: Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::request;
    use super::*;
    use crate::types::PaymentStatus;

    struct FakeAdapter {
        method: PaymentMethod,
        priority: u8,
        accept_all: bool,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        fn method(&self) -> PaymentMethod {
            self.method
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn supports(&self, _request: &AdapterRequest) -> bool {
            self.accept_all
        }

        async fn simulate(
            &self,
            _request: &AdapterRequest,
        ) -> Result<AdapterSimulation, PaymentError> {
            Ok(AdapterSimulation::ok(self.method))
        }

        async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError> {
            Ok(PaymentResult {
                success: true,
                status: PaymentStatus::Completed,
                method: self.method,
                provider_tx_id: None,
                tx_hash: None,
                amount: request.amount,
                recipient: request.recipient.clone(),
                guards_passed: Vec::new(),
                error: None,
                ledger_entry_id: None,
                metadata: Metadata::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_lowest_priority_wins() {
        let mut router = Router::new();
        router.register(Arc::new(FakeAdapter {
            method: PaymentMethod::Transfer,
            priority: PRIORITY_TRANSFER,
            accept_all: true,
        }));
        router.register(Arc::new(FakeAdapter {
            method: PaymentMethod::X402,
            priority: PRIORITY_X402,
            accept_all: true,
        }));

        let req = request("anything", Decimal::ONE);
        assert_eq!(router.detect_method(&req), Some(PaymentMethod::X402));
    }

    #[tokio::test]
    async fn test_unmatched_recipient_is_routing_failed() {
        let mut router = Router::new();
        router.register(Arc::new(FakeAdapter {
            method: PaymentMethod::Transfer,
            priority: PRIORITY_TRANSFER,
            accept_all: false,
        }));

        let req = request("bob@example.com", Decimal::ONE);
        let err = router.execute(&req).await.unwrap_err();
        assert_eq!(err.kind(), "routing_failed");
    }

    #[tokio::test]
    async fn test_execute_delegates_to_match() {
        let mut router = Router::new();
        router.register(Arc::new(FakeAdapter {
            method: PaymentMethod::Transfer,
            priority: PRIORITY_TRANSFER,
            accept_all: true,
        }));

        let req = request("0xabc", Decimal::ONE);
        let result = router.execute(&req).await.unwrap();
        assert!(result.success);
        assert_eq!(result.method, PaymentMethod::Transfer);
    }

    #[test]
    fn test_is_cross_network() {
        let mut req = request("0xabc", Decimal::ONE);
        assert!(!req.is_cross_network());
        req.destination_network = Some(Network::BaseSepolia);
        assert!(!req.is_cross_network());
        req.destination_network = Some(Network::ArbitrumSepolia);
        assert!(req.is_cross_network());
    }
}
