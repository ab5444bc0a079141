//! Direct custody transfer adapter.
//!
//! Handles chain-address recipients on the wallet's own network by
//! delegating to the custody provider. The accepted address shape follows
//! the wallet's network family — EVM-style 40-hex for EVM wallets, Base58
//! for Solana-family wallets — not recipient inspection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::custody::{CustodyProvider, TransactionState, TransferRequest};
use crate::error::PaymentError;
use crate::route::{Adapter, AdapterRequest, AdapterSimulation, PRIORITY_TRANSFER};
use crate::types::{
    is_base58_address, is_evm_address, ErrorInfo, Metadata, PaymentMethod, PaymentResult,
    PaymentStatus,
};

/// How often a confirmation wait polls the provider.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Confirmation wait bound when the request carries no deadline.
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Adapter for direct transfers on the wallet's own network.
pub struct TransferAdapter {
    custody: Arc<dyn CustodyProvider>,
}

impl std::fmt::Debug for TransferAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferAdapter").finish_non_exhaustive()
    }
}

impl TransferAdapter {
    /// Creates a transfer adapter over the custody capability.
    #[must_use]
    pub fn new(custody: Arc<dyn CustodyProvider>) -> Self {
        Self { custody }
    }

    fn address_matches_network(request: &AdapterRequest) -> bool {
        if request.wallet.network.is_solana() {
            is_base58_address(&request.recipient)
        } else {
            is_evm_address(&request.recipient)
        }
    }

    /// Maps a provider transaction state onto a payment status.
    fn status_for(state: TransactionState) -> PaymentStatus {
        match state {
            TransactionState::Complete => PaymentStatus::Completed,
            TransactionState::Failed | TransactionState::Cancelled => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    /// Polls the provider until the transaction is terminal or the deadline
    /// passes. The dispatched transfer itself is never cancelled; an
    /// elapsed deadline is reported as a timeout.
    async fn wait_for_terminal(
        &self,
        tx_id: &str,
        deadline: Option<Duration>,
    ) -> Result<crate::custody::ProviderTransaction, PaymentError> {
        let bound = deadline.unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT);
        let started = Instant::now();
        loop {
            let tx = self.custody.transaction(tx_id).await?;
            if tx.state.is_terminal() {
                return Ok(tx);
            }
            if started.elapsed() >= bound {
                return Err(PaymentError::Timeout(format!(
                    "transaction {tx_id} not confirmed within {}s",
                    bound.as_secs()
                )));
            }
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Adapter for TransferAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Transfer
    }

    fn priority(&self) -> u8 {
        PRIORITY_TRANSFER
    }

    fn supports(&self, request: &AdapterRequest) -> bool {
        if request.is_cross_network() {
            return false;
        }
        Self::address_matches_network(request)
    }

    async fn simulate(&self, request: &AdapterRequest) -> Result<AdapterSimulation, PaymentError> {
        if !Self::address_matches_network(request) {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::Transfer,
                format!(
                    "recipient is not a valid {} address",
                    request.wallet.network
                ),
            ));
        }
        let balance = self.custody.balance(&request.wallet.id).await?;
        if balance < request.amount {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::Transfer,
                format!("insufficient balance: {balance} < {}", request.amount),
            ));
        }
        Ok(AdapterSimulation {
            estimated_fee: Some(rust_decimal::Decimal::ZERO),
            ..AdapterSimulation::ok(PaymentMethod::Transfer)
        })
    }

    async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError> {
        debug!(
            wallet_id = %request.wallet.id,
            recipient = %request.recipient,
            amount = %request.amount,
            "executing direct transfer"
        );
        let mut tx = self
            .custody
            .transfer(TransferRequest {
                wallet_id: request.wallet.id.clone(),
                destination_address: request.recipient.clone(),
                amount: request.amount,
                fee_level: request.fee_level,
                idempotency_key: Some(request.idempotency_key.clone()),
            })
            .await?;

        if request.wait_for_confirmation && !tx.state.is_terminal() {
            tx = self.wait_for_terminal(&tx.id, request.timeout).await?;
        }

        let status = Self::status_for(tx.state);
        let failed = matches!(status, PaymentStatus::Failed);
        let mut metadata = Metadata::new();
        metadata.insert("tx_state".into(), json!(tx.state));
        if let Some(purpose) = &request.purpose {
            metadata.insert("purpose".into(), json!(purpose));
        }

        Ok(PaymentResult {
            success: !failed,
            // A dispatched-but-unconfirmed transfer reports completed from
            // the sender's perspective unless the caller asked to wait.
            status: if failed || request.wait_for_confirmation {
                status
            } else {
                PaymentStatus::Completed
            },
            method: PaymentMethod::Transfer,
            provider_tx_id: Some(tx.id),
            tx_hash: tx.tx_hash,
            amount: request.amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error: tx.error_reason.map(|reason| ErrorInfo {
                kind: "protocol_error".into(),
                message: reason,
            }),
            ledger_entry_id: None,
            metadata,
        })
    }
}
