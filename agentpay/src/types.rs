//! Core request, result, and wallet types.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PaymentError;
use crate::network::Network;

/// Free-form metadata attached to requests, results, and persisted records.
pub type Metadata = BTreeMap<String, Value>;

/// Fee level hint forwarded to the custody provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    /// Cheapest, slowest inclusion.
    Low,
    /// Balanced (default).
    #[default]
    Medium,
    /// Fastest inclusion.
    High,
}

/// How the pipeline reacts to upstream failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResilienceStrategy {
    /// Single attempt; any failure surfaces immediately.
    FailFast,
    /// Retry transient failures with backoff, then fail (default).
    #[default]
    RetryThenFail,
    /// On outage, park the payment as an intent with a fund reservation
    /// instead of failing the caller.
    QueueBackground,
}

/// Whether the pre-flight trust hook runs for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustCheck {
    /// Run the hook iff one is configured and guards are not skipped.
    #[default]
    Auto,
    /// Always run the hook (even with `skip_guards`).
    On,
    /// Never run the hook.
    Off,
}

/// Transport used to execute a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Direct custody transfer to a chain address.
    Transfer,
    /// HTTP-402 negotiated payment to a URL.
    X402,
    /// Cross-chain burn/attest/mint.
    CrossChain,
}

/// Status of a payment attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Recorded, not yet terminal.
    #[default]
    Pending,
    /// Funds moved.
    Completed,
    /// Execution failed.
    Failed,
    /// A guard or the trust hook rejected it.
    Blocked,
    /// Cancelled before execution.
    Cancelled,
}

impl PaymentStatus {
    /// Returns `true` once the status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Shape of a recipient string, decided at route time.
///
/// Classification is deterministic: URL schemes win, then EVM-style hex,
/// then Base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    /// An on-chain address (EVM hex or Base58).
    ChainAddress,
    /// An `http://` / `https://` URL.
    HttpUrl,
    /// Anything else; no adapter will match it.
    Other,
}

fn evm_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(0x)?[0-9a-fA-F]{40}$").expect("valid regex"))
}

fn base58_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("valid regex"))
}

impl RecipientKind {
    /// Classifies a recipient string.
    #[must_use]
    pub fn classify(recipient: &str) -> Self {
        let r = recipient.trim();
        if r.starts_with("http://") || r.starts_with("https://") {
            return Self::HttpUrl;
        }
        if evm_address_re().is_match(r) {
            return Self::ChainAddress;
        }
        if base58_address_re().is_match(r) && !r.starts_with("0x") {
            return Self::ChainAddress;
        }
        Self::Other
    }
}

/// Returns `true` if `address` is a 40-hex EVM address (optional `0x`).
#[must_use]
pub fn is_evm_address(address: &str) -> bool {
    evm_address_re().is_match(address.trim())
}

/// Returns `true` if `address` looks like a Base58 Solana-family address.
#[must_use]
pub fn is_base58_address(address: &str) -> bool {
    let a = address.trim();
    base58_address_re().is_match(a) && !a.starts_with("0x")
}

/// A payment to execute.
///
/// Construct with [`PaymentRequest::new`] and refine with the `with_*`
/// setters:
///
/// ```
/// use agentpay::{PaymentRequest, ResilienceStrategy};
/// use rust_decimal::Decimal;
///
/// let request = PaymentRequest::new("wallet-1", "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", Decimal::new(2500, 2))
///     .with_purpose("API credits")
///     .with_strategy(ResilienceStrategy::FailFast);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Source wallet id.
    pub wallet_id: String,
    /// Wallet-set id, for set-scoped guards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_set_id: Option<String>,
    /// Payment recipient: chain address or URL.
    pub recipient: String,
    /// Amount in whole tokens.
    pub amount: Decimal,
    /// Destination network; present means a cross-chain intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_network: Option<Network>,
    /// Human-readable purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Opaque metadata merged into the ledger entry.
    #[serde(default)]
    pub metadata: Metadata,
    /// Deduplication key; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Fee level hint.
    #[serde(default)]
    pub fee_level: FeeLevel,
    /// Skip guard evaluation entirely.
    #[serde(default)]
    pub skip_guards: bool,
    /// Trust hook override.
    #[serde(default)]
    pub trust_check: TrustCheck,
    /// Wait for on-chain confirmation before returning.
    #[serde(default)]
    pub wait_for_confirmation: bool,
    /// Caller deadline. A dispatched external call still completes, but the
    /// result is reported as a timeout once the deadline has elapsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Failure handling strategy.
    #[serde(default)]
    pub strategy: ResilienceStrategy,
}

impl PaymentRequest {
    /// Creates a request with defaults for every optional field.
    pub fn new(
        wallet_id: impl Into<String>,
        recipient: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            wallet_set_id: None,
            recipient: recipient.into(),
            amount,
            destination_network: None,
            purpose: None,
            metadata: Metadata::new(),
            idempotency_key: None,
            fee_level: FeeLevel::default(),
            skip_guards: false,
            trust_check: TrustCheck::default(),
            wait_for_confirmation: false,
            timeout: None,
            strategy: ResilienceStrategy::default(),
        }
    }

    /// Sets the wallet-set id.
    #[must_use]
    pub fn with_wallet_set(mut self, wallet_set_id: impl Into<String>) -> Self {
        self.wallet_set_id = Some(wallet_set_id.into());
        self
    }

    /// Sets the destination network, marking the payment cross-chain.
    #[must_use]
    pub fn with_destination_network(mut self, network: Network) -> Self {
        self.destination_network = Some(network);
        self
    }

    /// Sets the human-readable purpose.
    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets the fee level.
    #[must_use]
    pub const fn with_fee_level(mut self, fee_level: FeeLevel) -> Self {
        self.fee_level = fee_level;
        self
    }

    /// Sets the resilience strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ResilienceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Overrides the trust hook behavior.
    #[must_use]
    pub const fn with_trust_check(mut self, trust_check: TrustCheck) -> Self {
        self.trust_check = trust_check;
        self
    }

    /// Skips all guards. Dangerous; intended for operator tooling.
    #[must_use]
    pub const fn skipping_guards(mut self) -> Self {
        self.skip_guards = true;
        self
    }

    /// Waits for on-chain confirmation before returning.
    #[must_use]
    pub const fn waiting_for_confirmation(mut self) -> Self {
        self.wait_for_confirmation = true;
        self
    }

    /// Sets the caller deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Validates the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Validation`] for an empty wallet id, empty
    /// recipient, or non-positive amount.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.wallet_id.trim().is_empty() {
            return Err(PaymentError::Validation("wallet_id is required".into()));
        }
        if self.recipient.trim().is_empty() {
            return Err(PaymentError::Validation("recipient is required".into()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "payment amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Machine-readable error kind + human message, embedded in results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error kind (see [`PaymentError::kind`]).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&PaymentError> for ErrorInfo {
    fn from(err: &PaymentError) -> Self {
        Self {
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    /// `true` when funds moved (or the payment was accepted for deferred
    /// execution under the queue-background strategy).
    pub success: bool,
    /// Terminal (or pending, for queued payments) status.
    pub status: PaymentStatus,
    /// Transport that handled the payment.
    pub method: PaymentMethod,
    /// Custody provider transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_tx_id: Option<String>,
    /// On-chain transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Paid amount.
    pub amount: Decimal,
    /// Recipient as given in the request.
    pub recipient: String,
    /// Names of guards that passed.
    #[serde(default)]
    pub guards_passed: Vec<String>,
    /// Error kind + message when the payment did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Id of the ledger entry recording this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<String>,
    /// Route-specific metadata (e.g. cross-chain attestation URL).
    #[serde(default)]
    pub metadata: Metadata,
}

impl PaymentResult {
    /// Creates a failed result for the given error.
    #[must_use]
    pub fn failure(
        method: PaymentMethod,
        amount: Decimal,
        recipient: impl Into<String>,
        error: &PaymentError,
    ) -> Self {
        let status = match error {
            PaymentError::GuardBlocked { .. } => PaymentStatus::Blocked,
            _ => PaymentStatus::Failed,
        };
        Self {
            success: false,
            status,
            method,
            provider_tx_id: None,
            tx_hash: None,
            amount,
            recipient: recipient.into(),
            guards_passed: Vec::new(),
            error: Some(ErrorInfo::from(error)),
            ledger_entry_id: None,
            metadata: Metadata::new(),
        }
    }
}

/// Outcome of a non-destructive payment simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Whether the payment would be attempted.
    pub would_succeed: bool,
    /// Transport that would handle it.
    pub route: PaymentMethod,
    /// Estimated fee, when the adapter can produce one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<Decimal>,
    /// Guards whose `check` passed.
    #[serde(default)]
    pub guards_that_would_pass: Vec<String>,
    /// Guards whose `check` failed.
    #[serde(default)]
    pub guards_that_would_fail: Vec<String>,
    /// Free-form explanation, present when `would_succeed` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregate outcome of a batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Number of requests processed.
    pub total: usize,
    /// Requests that succeeded.
    pub succeeded: usize,
    /// Requests that failed or were blocked.
    pub failed: usize,
    /// Per-request outcomes, in request order.
    pub results: Vec<PaymentResult>,
}

/// Wallet metadata reported by the custody provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Opaque wallet id.
    pub id: String,
    /// On-chain address.
    pub address: String,
    /// Wallet-set the wallet belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_set_id: Option<String>,
    /// Network the wallet lives on.
    pub network: Network,
    /// `true` when the provider has frozen the wallet.
    #[serde(default)]
    pub frozen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_url() {
        assert_eq!(
            RecipientKind::classify("https://api.example.com/tool"),
            RecipientKind::HttpUrl
        );
        assert_eq!(
            RecipientKind::classify("http://localhost:8080"),
            RecipientKind::HttpUrl
        );
    }

    #[test]
    fn test_classify_evm_address() {
        let addr = format!("0x{}", "a".repeat(40));
        assert_eq!(RecipientKind::classify(&addr), RecipientKind::ChainAddress);
        assert_eq!(
            RecipientKind::classify(&"A".repeat(40)),
            RecipientKind::ChainAddress
        );
    }

    #[test]
    fn test_classify_base58_address() {
        assert_eq!(
            RecipientKind::classify("DRpbCBMxVnDK7maPM5tGv6MvB3v1sRMC86PZ8okm21hy"),
            RecipientKind::ChainAddress
        );
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(RecipientKind::classify("bob@example.com"), RecipientKind::Other);
        assert_eq!(RecipientKind::classify("0x123"), RecipientKind::Other);
        assert_eq!(RecipientKind::classify(""), RecipientKind::Other);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let inputs = [
            "https://api.example.com",
            &format!("0x{}", "b".repeat(40)),
            "not-an-address",
        ];
        for input in inputs {
            assert_eq!(RecipientKind::classify(input), RecipientKind::classify(input));
        }
    }

    #[test]
    fn test_request_validation() {
        let ok = PaymentRequest::new("w", "0x".to_owned() + &"a".repeat(40), Decimal::ONE);
        assert!(ok.validate().is_ok());

        let bad_amount = PaymentRequest::new("w", "r", Decimal::ZERO);
        assert!(matches!(
            bad_amount.validate(),
            Err(PaymentError::Validation(_))
        ));

        let negative = PaymentRequest::new("w", "r", Decimal::NEGATIVE_ONE);
        assert!(negative.validate().is_err());

        let no_wallet = PaymentRequest::new("", "r", Decimal::ONE);
        assert!(no_wallet.validate().is_err());
    }

    #[test]
    fn test_amount_text_roundtrip() {
        let amount: Decimal = "123.456789012345678901".parse().unwrap();
        assert_eq!(amount.to_string(), "123.456789012345678901");
        let sum = amount + Decimal::new(1, 18);
        assert_eq!(sum.to_string(), "123.456789012345678902");
    }

    #[test]
    fn test_status_terminality() {
        assert!(!PaymentStatus::Pending.is_terminal());
        for status in [
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Blocked,
            PaymentStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
        }
    }
}
