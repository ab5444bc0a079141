//! Custody provider capability.
//!
//! The core never holds private keys and never talks to a chain directly:
//! everything that moves funds goes through this capability, implemented
//! against the custody provider's remote API. Exactly-once execution is the
//! provider's responsibility, keyed by the idempotency key on each request.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;
use crate::network::Network;
use crate::types::{FeeLevel, WalletInfo};

/// Lifecycle state of a provider transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    /// Accepted by the provider.
    Initiated,
    /// Waiting to be signed/broadcast.
    Queued,
    /// Broadcast to the network.
    Sent,
    /// Included on-chain, awaiting finality.
    Confirmed,
    /// Final and successful.
    Complete,
    /// Final and failed.
    Failed,
    /// Cancelled before broadcast.
    Cancelled,
}

impl TransactionState {
    /// Returns `true` once the state can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` for the successful terminal state.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// A transaction as reported by the custody provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTransaction {
    /// Provider-side transaction id.
    pub id: String,
    /// Current state.
    pub state: TransactionState,
    /// On-chain hash, once broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Provider-reported failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// A direct token transfer request.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source wallet.
    pub wallet_id: String,
    /// Destination chain address.
    pub destination_address: String,
    /// Amount in whole tokens.
    pub amount: Decimal,
    /// Fee level hint.
    pub fee_level: FeeLevel,
    /// Exactly-once key, delegated to the provider.
    pub idempotency_key: Option<String>,
}

/// A smart-contract invocation request (approvals, burns, mints).
#[derive(Debug, Clone)]
pub struct ContractCall {
    /// Wallet executing the call.
    pub wallet_id: String,
    /// Target contract address.
    pub contract_address: String,
    /// ABI function signature, e.g. `"approve(address,uint256)"`.
    pub function_signature: String,
    /// Stringified ABI parameters, in order.
    pub parameters: Vec<String>,
    /// Fee level hint.
    pub fee_level: FeeLevel,
    /// Exactly-once key, delegated to the provider.
    pub idempotency_key: Option<String>,
}

/// Capability boundary to the remote custody API.
#[async_trait]
pub trait CustodyProvider: Send + Sync {
    /// Looks up a wallet.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::WalletNotFound`] for unknown ids.
    async fn wallet(&self, wallet_id: &str) -> Result<WalletInfo, PaymentError>;

    /// Live stablecoin balance of a wallet, in whole tokens.
    async fn balance(&self, wallet_id: &str) -> Result<Decimal, PaymentError>;

    /// Moves funds to a chain address on the wallet's own network.
    async fn transfer(&self, request: TransferRequest) -> Result<ProviderTransaction, PaymentError>;

    /// Executes a contract call from a wallet.
    async fn contract_call(&self, call: ContractCall) -> Result<ProviderTransaction, PaymentError>;

    /// Re-fetches a transaction by provider id.
    async fn transaction(&self, tx_id: &str) -> Result<ProviderTransaction, PaymentError>;

    /// Lists wallets the embedder owns on a network (used to find an
    /// executor wallet for destination-side contract calls).
    async fn wallets_on(&self, network: Network) -> Result<Vec<WalletInfo>, PaymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_terminality() {
        assert!(TransactionState::Complete.is_terminal());
        assert!(TransactionState::Complete.is_successful());
        assert!(TransactionState::Failed.is_terminal());
        assert!(!TransactionState::Failed.is_successful());
        assert!(!TransactionState::Sent.is_terminal());
    }

    #[test]
    fn test_state_serde_matches_provider_wire_format() {
        let json = serde_json::to_string(&TransactionState::Confirmed).unwrap();
        assert_eq!(json, "\"CONFIRMED\"");
    }
}
