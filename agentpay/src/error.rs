//! Error types for payment operations.
//!
//! Every error carries a stable machine-readable kind (see
//! [`PaymentError::kind`]) next to its human-readable message. The kind is
//! what embedders should match on; messages are free to change.

use rust_decimal::Decimal;

use crate::storage::StorageError;

/// The error type for all payment operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    /// Missing credential, unknown network, or otherwise unusable setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed request (e.g. negative amount, empty wallet id).
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced wallet does not exist at the custody provider.
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// Available balance cannot cover the requested amount.
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        /// Balance available after subtracting open reservations.
        available: Decimal,
        /// Amount the payment needs.
        required: Decimal,
    },

    /// The per-wallet fund lock could not be acquired.
    #[error("wallet is busy (locked by another payment)")]
    WalletBusy,

    /// A guard rejected the payment.
    #[error("blocked by guard '{guard}': {reason}")]
    GuardBlocked {
        /// Name of the guard that rejected.
        guard: String,
        /// Why it rejected.
        reason: String,
    },

    /// No adapter matched the recipient.
    #[error("no payment route for recipient: {0}")]
    RoutingFailed(String),

    /// The counterparty violated the expected adapter protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transient upstream failure; eligible for retry.
    #[error("network error: {0}")]
    Network(String),

    /// The caller-imposed deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The circuit breaker is open for the named service.
    #[error("circuit open for '{service}', recovery at {recovery_at}")]
    CircuitOpen {
        /// Gated service name.
        service: String,
        /// Unix seconds at which a recovery probe is admitted.
        recovery_at: u64,
    },

    /// No intent with the given id exists.
    #[error("intent not found: {0}")]
    IntentNotFound(String),

    /// The intent has already reached a terminal state.
    #[error("intent already terminal: {0}")]
    IntentAlreadyTerminal(String),

    /// The intent expired before it was confirmed.
    #[error("intent expired: {0}")]
    IntentExpired(String),
}

impl PaymentError {
    /// Returns the stable machine-readable kind for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Validation(_) => "validation_error",
            Self::WalletNotFound(_) => "wallet_not_found",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::WalletBusy => "wallet_busy",
            Self::GuardBlocked { .. } => "guard_blocked",
            Self::RoutingFailed(_) => "routing_failed",
            Self::Protocol(_) => "protocol_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::IntentNotFound(_) => "intent_not_found",
            Self::IntentAlreadyTerminal(_) => "intent_already_terminal",
            Self::IntentExpired(_) => "intent_expired",
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Only upstream timeouts, connection failures, 5xx responses and
    /// explicit rate limits are transient. Guard blocks, validation
    /// failures, balance shortfalls and open circuits are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<StorageError> for PaymentError {
    fn from(err: StorageError) -> Self {
        Self::Network(err.to_string())
    }
}
