//! The cross-chain adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use agentpay::custody::{ContractCall, CustodyProvider, ProviderTransaction, TransferRequest};
use agentpay::route::{Adapter, AdapterRequest, AdapterSimulation, PRIORITY_CROSS_CHAIN};
use agentpay::types::{ErrorInfo, Metadata, PaymentMethod, PaymentResult, PaymentStatus};
use agentpay::{Network, PaymentError};

use agentpay_x402::{CrossNetworkSettler, SettlementReceipt};

use crate::constants::{
    attestation_base, attestation_url, domain_id, message_transmitter, token_messenger,
    usdc_contract, DEFAULT_MAX_FEE_SUBUNITS, EMPTY_DESTINATION_CALLER, FAST_FINALITY_THRESHOLD,
    STANDARD_FINALITY_THRESHOLD,
};

/// Subunit scale of the bridged stablecoin.
const SUBUNIT_SCALE: u32 = 6;

/// Tuning for the cross-chain flow. Defaults match the protocol's service
/// levels: fast transfers attest within seconds, standard transfers within
/// roughly twenty minutes.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Attestation API base; `None` selects the public endpoint for the
    /// source network.
    pub attestation_override: Option<String>,
    /// Delay between attestation polls.
    pub poll_interval: Duration,
    /// Attestation wait bound in fast mode.
    pub max_wait_fast: Duration,
    /// Attestation wait bound in standard mode.
    pub max_wait_standard: Duration,
    /// Delay between provider transaction polls.
    pub confirmation_poll: Duration,
    /// Bound on waiting for approve/burn/mint confirmation.
    pub confirmation_wait: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            attestation_override: None,
            poll_interval: Duration::from_secs(5),
            max_wait_fast: Duration::from_secs(60),
            max_wait_standard: Duration::from_secs(20 * 60),
            confirmation_poll: Duration::from_secs(2),
            confirmation_wait: Duration::from_secs(5 * 60),
        }
    }
}

/// Adapter executing burn/attest/mint transfers between networks.
pub struct BridgeAdapter {
    custody: Arc<dyn CustodyProvider>,
    http: reqwest::Client,
    options: BridgeOptions,
}

impl std::fmt::Debug for BridgeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeAdapter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Outcome of the attestation poll.
struct Attestation {
    message: String,
    signature: String,
    url: String,
}

impl BridgeAdapter {
    /// Creates an adapter with default tuning.
    #[must_use]
    pub fn new(custody: Arc<dyn CustodyProvider>) -> Self {
        Self::with_options(custody, BridgeOptions::default())
    }

    /// Creates an adapter with explicit tuning.
    #[must_use]
    pub fn with_options(custody: Arc<dyn CustodyProvider>, options: BridgeOptions) -> Self {
        Self {
            custody,
            http: reqwest::Client::new(),
            options,
        }
    }

    fn subunits(amount: Decimal) -> String {
        (amount * Decimal::from(10_u64.pow(SUBUNIT_SCALE)))
            .trunc()
            .normalize()
            .to_string()
    }

    fn bytes32_address(address: &str) -> String {
        let stripped = address.trim().trim_start_matches("0x").to_lowercase();
        format!("0x{stripped:0>64}")
    }

    fn base_metadata(source_domain: u32, dest_domain: u32, fast: bool) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("bridge_version".into(), json!("v2"));
        metadata.insert("source_domain".into(), json!(source_domain));
        metadata.insert("destination_domain".into(), json!(dest_domain));
        metadata.insert(
            "transfer_mode".into(),
            json!(if fast { "fast" } else { "standard" }),
        );
        metadata
    }

    fn failure(
        request: &AdapterRequest,
        kind: &str,
        message: String,
        metadata: Metadata,
        tx: Option<&ProviderTransaction>,
    ) -> PaymentResult {
        PaymentResult {
            success: false,
            status: PaymentStatus::Failed,
            method: PaymentMethod::CrossChain,
            provider_tx_id: tx.map(|t| t.id.clone()),
            tx_hash: tx.and_then(|t| t.tx_hash.clone()),
            amount: request.amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error: Some(ErrorInfo {
                kind: kind.to_owned(),
                message,
            }),
            ledger_entry_id: None,
            metadata,
        }
    }

    /// Polls the provider until the transaction has a hash and a settled
    /// state, bounded by the confirmation wait.
    async fn wait_for_confirmation(
        &self,
        tx: ProviderTransaction,
    ) -> Result<ProviderTransaction, PaymentError> {
        let started = Instant::now();
        let mut current = tx;
        loop {
            if current.state.is_terminal() || current.tx_hash.is_some() {
                return Ok(current);
            }
            if started.elapsed() >= self.options.confirmation_wait {
                return Err(PaymentError::Timeout(format!(
                    "transaction {} unconfirmed after {}s",
                    current.id,
                    self.options.confirmation_wait.as_secs()
                )));
            }
            tokio::time::sleep(self.options.confirmation_poll).await;
            current = self.custody.transaction(&current.id).await?;
        }
    }

    /// Polls the attestation service until the burn is signed.
    ///
    /// Returns `Err(url)` with the polled URL when the bound elapses, so
    /// callers can surface it for manual reconciliation.
    async fn poll_attestation(
        &self,
        source: Network,
        source_domain: u32,
        burn_tx_hash: &str,
        request: &AdapterRequest,
    ) -> Result<Attestation, String> {
        let base = self
            .options
            .attestation_override
            .clone()
            .unwrap_or_else(|| attestation_base(source).to_owned());
        let url = attestation_url(&base, source_domain, burn_tx_hash);

        let mut bound = if request.fast_transfer {
            self.options.max_wait_fast
        } else {
            self.options.max_wait_standard
        };
        if let Some(deadline) = request.timeout {
            bound = bound.min(deadline);
        }

        let started = Instant::now();
        loop {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body: Value = response.json().await.unwrap_or(Value::Null);
                    if let Some(message) = body
                        .get("messages")
                        .and_then(Value::as_array)
                        .and_then(|m| m.first())
                    {
                        let status = message.get("status").and_then(Value::as_str);
                        if status == Some("complete") {
                            let signature = message
                                .get("attestation")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned();
                            let payload = message
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned();
                            if !signature.is_empty() && !payload.is_empty() {
                                info!(elapsed_s = started.elapsed().as_secs(), "attestation received");
                                return Ok(Attestation {
                                    message: payload,
                                    signature,
                                    url,
                                });
                            }
                        }
                        debug!(?status, "attestation not ready");
                    }
                }
                // 404 means the burn is not indexed yet; anything else is
                // polled through as well.
                Ok(response) => debug!(status = %response.status(), "attestation poll"),
                Err(err) => debug!(%err, "attestation poll failed"),
            }

            if started.elapsed() >= bound {
                warn!(url = %url, "attestation polling timed out");
                return Err(url);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Delivers the signed message on the destination network through an
    /// embedder-owned wallet.
    async fn self_mint(
        &self,
        destination: Network,
        attestation: &Attestation,
        request: &AdapterRequest,
    ) -> Result<ProviderTransaction, PaymentError> {
        let transmitter = message_transmitter(destination).ok_or_else(|| {
            PaymentError::Configuration(format!(
                "no message transmitter for {destination}"
            ))
        })?;
        let wallets = self.custody.wallets_on(destination).await?;
        let executor = wallets
            .iter()
            .find(|w| !w.frozen)
            .ok_or_else(|| {
                PaymentError::Configuration(format!(
                    "no wallet on {destination} to deliver the mint; create one with gas funds"
                ))
            })?;
        info!(executor = %executor.id, network = %destination, "minting via embedder wallet");
        let tx = self
            .custody
            .contract_call(ContractCall {
                wallet_id: executor.id.clone(),
                contract_address: transmitter.to_owned(),
                function_signature: "receiveMessage(bytes,bytes)".into(),
                parameters: vec![attestation.message.clone(), attestation.signature.clone()],
                fee_level: request.fee_level,
                idempotency_key: Some(format!("{}-mint", request.idempotency_key)),
            })
            .await?;
        self.wait_for_confirmation(tx).await
    }

    /// Same-network fallback: a plain custody transfer.
    async fn same_network_transfer(
        &self,
        request: &AdapterRequest,
        destination: Network,
    ) -> Result<PaymentResult, PaymentError> {
        let tx = self
            .custody
            .transfer(TransferRequest {
                wallet_id: request.wallet.id.clone(),
                destination_address: request.recipient.clone(),
                amount: request.amount,
                fee_level: request.fee_level,
                idempotency_key: Some(request.idempotency_key.clone()),
            })
            .await?;
        let mut metadata = Metadata::new();
        metadata.insert("same_network".into(), json!(true));
        metadata.insert("destination_network".into(), json!(destination));
        Ok(PaymentResult {
            success: true,
            status: PaymentStatus::Completed,
            method: PaymentMethod::CrossChain,
            provider_tx_id: Some(tx.id),
            tx_hash: tx.tx_hash,
            amount: request.amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error: None,
            ledger_entry_id: None,
            metadata,
        })
    }
}

#[async_trait]
impl Adapter for BridgeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CrossChain
    }

    fn priority(&self) -> u8 {
        PRIORITY_CROSS_CHAIN
    }

    fn supports(&self, request: &AdapterRequest) -> bool {
        request.destination_network.is_some()
    }

    async fn simulate(&self, request: &AdapterRequest) -> Result<AdapterSimulation, PaymentError> {
        let Some(destination) = request.destination_network else {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::CrossChain,
                "destination network is required",
            ));
        };

        if destination != request.wallet.network {
            for network in [request.wallet.network, destination] {
                if domain_id(network).is_none() || usdc_contract(network).is_none() {
                    return Ok(AdapterSimulation::fail(
                        PaymentMethod::CrossChain,
                        format!("network {network} is not bridgeable"),
                    ));
                }
            }
        }

        let balance = self.custody.balance(&request.wallet.id).await?;
        if balance < request.amount {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::CrossChain,
                format!("insufficient balance: {balance} < {}", request.amount),
            ));
        }

        Ok(AdapterSimulation {
            estimated_fee: Some(Decimal::new(
                i64::try_from(DEFAULT_MAX_FEE_SUBUNITS).unwrap_or(0),
                SUBUNIT_SCALE,
            )),
            ..AdapterSimulation::ok(PaymentMethod::CrossChain)
        })
    }

    async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError> {
        let destination = request.destination_network.ok_or_else(|| {
            PaymentError::Validation("destination network is required for cross-chain".into())
        })?;
        let source = request.wallet.network;

        if destination == source {
            return self.same_network_transfer(request, destination).await;
        }

        let (Some(source_domain), Some(dest_domain)) = (domain_id(source), domain_id(destination))
        else {
            return Err(PaymentError::Configuration(format!(
                "no messaging domain for {source} -> {destination}"
            )));
        };
        let (Some(messenger), Some(usdc)) = (token_messenger(source), usdc_contract(source)) else {
            return Err(PaymentError::Configuration(format!(
                "bridge contracts not available on {source}"
            )));
        };

        let fast = request.fast_transfer;
        let units = Self::subunits(request.amount);
        // Standard mode forgoes the relayer (fee cap 0) and the embedder's
        // destination wallet delivers the mint.
        let max_fee = if fast { DEFAULT_MAX_FEE_SUBUNITS } else { 0 };
        let finality = if fast {
            FAST_FINALITY_THRESHOLD
        } else {
            STANDARD_FINALITY_THRESHOLD
        };
        let mut metadata = Self::base_metadata(source_domain, dest_domain, fast);

        // Step 1: approve the token messenger.
        info!(amount = %request.amount, %source, %destination, "bridge: approving transfer");
        let approve_tx = self
            .custody
            .contract_call(ContractCall {
                wallet_id: request.wallet.id.clone(),
                contract_address: usdc.to_owned(),
                function_signature: "approve(address,uint256)".into(),
                parameters: vec![messenger.to_owned(), units.clone()],
                fee_level: request.fee_level,
                idempotency_key: Some(format!("{}-approve", request.idempotency_key)),
            })
            .await?;
        let approve_tx = self.wait_for_confirmation(approve_tx).await?;
        if approve_tx.state == agentpay::custody::TransactionState::Failed {
            return Ok(Self::failure(
                request,
                "protocol_error",
                "token approval reverted".into(),
                metadata,
                Some(&approve_tx),
            ));
        }

        // Step 2: burn on the source network.
        info!("bridge: depositForBurn on {source}");
        let burn_tx = self
            .custody
            .contract_call(ContractCall {
                wallet_id: request.wallet.id.clone(),
                contract_address: messenger.to_owned(),
                function_signature:
                    "depositForBurn(uint256,uint32,bytes32,address,bytes32,uint256,uint32)".into(),
                parameters: vec![
                    units,
                    dest_domain.to_string(),
                    Self::bytes32_address(&request.recipient),
                    usdc.to_owned(),
                    EMPTY_DESTINATION_CALLER.to_owned(),
                    max_fee.to_string(),
                    finality.to_string(),
                ],
                fee_level: request.fee_level,
                idempotency_key: Some(format!("{}-burn", request.idempotency_key)),
            })
            .await?;
        let burn_tx = self.wait_for_confirmation(burn_tx).await?;
        metadata.insert("burn_tx_id".into(), json!(burn_tx.id));
        if burn_tx.state == agentpay::custody::TransactionState::Failed {
            return Ok(Self::failure(
                request,
                "protocol_error",
                "burn transaction reverted".into(),
                metadata,
                Some(&burn_tx),
            ));
        }
        let Some(burn_hash) = burn_tx.tx_hash.clone() else {
            return Ok(Self::failure(
                request,
                "timeout",
                "burn transaction never produced a hash".into(),
                metadata,
                Some(&burn_tx),
            ));
        };
        metadata.insert("burn_tx_hash".into(), json!(burn_hash));

        // Step 3: wait for the signed attestation.
        let attestation = match self
            .poll_attestation(source, source_domain, &burn_hash, request)
            .await
        {
            Ok(attestation) => attestation,
            Err(url) => {
                // Funds are burned; keep every identifier needed to finish
                // the transfer by hand.
                metadata.insert("attestation_url".into(), json!(url));
                return Ok(Self::failure(
                    request,
                    "timeout",
                    "attestation polling timed out".into(),
                    metadata,
                    Some(&burn_tx),
                ));
            }
        };
        metadata.insert("attestation_url".into(), json!(attestation.url));

        // Step 4: deliver on the destination.
        if max_fee > 0 {
            metadata.insert("mint".into(), json!("relayer"));
            info!("bridge: attestation secured, relayer delivers the mint");
        } else {
            match self.self_mint(destination, &attestation, request).await {
                Ok(mint_tx) => {
                    metadata.insert("mint".into(), json!("self"));
                    metadata.insert("mint_tx_hash".into(), json!(mint_tx.tx_hash));
                }
                Err(err) => {
                    metadata.insert("mint".into(), json!("manual_required"));
                    return Ok(Self::failure(
                        request,
                        err.kind(),
                        format!("mint delivery failed: {err}"),
                        metadata,
                        Some(&burn_tx),
                    ));
                }
            }
        }

        Ok(PaymentResult {
            success: true,
            status: PaymentStatus::Completed,
            method: PaymentMethod::CrossChain,
            provider_tx_id: Some(burn_tx.id),
            tx_hash: Some(burn_hash),
            amount: request.amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error: None,
            ledger_entry_id: None,
            metadata,
        })
    }
}

#[async_trait]
impl CrossNetworkSettler for BridgeAdapter {
    async fn settle(
        &self,
        request: &AdapterRequest,
        pay_to: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<SettlementReceipt, PaymentError> {
        let mut bridged = request.clone();
        bridged.recipient = pay_to.to_owned();
        bridged.amount = amount;
        bridged.destination_network = Some(network);

        let result = self.execute(&bridged).await?;
        if !result.success {
            let message = result
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "cross-network settlement failed".into());
            return Err(PaymentError::Protocol(message));
        }
        Ok(SettlementReceipt {
            provider_tx_id: result.provider_tx_id,
            tx_hash: result.tx_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentpay::custody::TransactionState;
    use agentpay::types::{FeeLevel, WalletInfo};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Custody fake that records contract calls and succeeds instantly.
    struct FakeCustody {
        calls: Mutex<Vec<ContractCall>>,
        destination_wallets: Vec<WalletInfo>,
    }

    impl FakeCustody {
        fn new(destination_wallets: Vec<WalletInfo>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                destination_wallets,
            })
        }

        fn signatures(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.function_signature.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CustodyProvider for FakeCustody {
        async fn wallet(&self, wallet_id: &str) -> Result<WalletInfo, PaymentError> {
            Ok(WalletInfo {
                id: wallet_id.to_owned(),
                address: format!("0x{}", "1".repeat(40)),
                wallet_set_id: None,
                network: Network::BaseSepolia,
                frozen: false,
            })
        }

        async fn balance(&self, _wallet_id: &str) -> Result<Decimal, PaymentError> {
            Ok(Decimal::new(1000, 0))
        }

        async fn transfer(
            &self,
            _request: TransferRequest,
        ) -> Result<ProviderTransaction, PaymentError> {
            Ok(ProviderTransaction {
                id: "tx-direct".into(),
                state: TransactionState::Complete,
                tx_hash: Some("0xdirect".into()),
                error_reason: None,
            })
        }

        async fn contract_call(&self, call: ContractCall) -> Result<ProviderTransaction, PaymentError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(call);
                calls.len()
            };
            Ok(ProviderTransaction {
                id: format!("tx-{n}"),
                state: TransactionState::Complete,
                tx_hash: Some(format!("0xcall{n}")),
                error_reason: None,
            })
        }

        async fn transaction(&self, tx_id: &str) -> Result<ProviderTransaction, PaymentError> {
            Ok(ProviderTransaction {
                id: tx_id.to_owned(),
                state: TransactionState::Complete,
                tx_hash: Some("0xconfirmed".into()),
                error_reason: None,
            })
        }

        async fn wallets_on(&self, _network: Network) -> Result<Vec<WalletInfo>, PaymentError> {
            Ok(self.destination_wallets.clone())
        }
    }

    fn request_to(destination: Network, fast: bool) -> AdapterRequest {
        AdapterRequest {
            wallet: WalletInfo {
                id: "w1".into(),
                address: format!("0x{}", "1".repeat(40)),
                wallet_set_id: None,
                network: Network::BaseSepolia,
                frozen: false,
            },
            recipient: format!("0x{}", "c".repeat(40)),
            amount: Decimal::new(25, 0),
            fee_level: FeeLevel::Medium,
            idempotency_key: "idem-x".into(),
            destination_network: Some(destination),
            purpose: None,
            timeout: None,
            wait_for_confirmation: false,
            fast_transfer: fast,
            metadata: Metadata::new(),
        }
    }

    fn fast_options(attestation_base: String) -> BridgeOptions {
        BridgeOptions {
            attestation_override: Some(attestation_base),
            poll_interval: Duration::from_millis(10),
            max_wait_fast: Duration::from_millis(500),
            max_wait_standard: Duration::from_millis(500),
            confirmation_poll: Duration::from_millis(5),
            confirmation_wait: Duration::from_millis(200),
        }
    }

    fn complete_attestation() -> serde_json::Value {
        json!({
            "messages": [{
                "status": "complete",
                "attestation": "0xsigned",
                "message": "0xmessagebytes"
            }]
        })
    }

    #[tokio::test]
    async fn test_fast_transfer_burns_attests_and_hands_off() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/messages/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_attestation()))
            .mount(&server)
            .await;

        let custody = FakeCustody::new(Vec::new());
        let adapter = BridgeAdapter::with_options(
            Arc::clone(&custody) as Arc<dyn CustodyProvider>,
            fast_options(server.uri()),
        );
        let request = request_to(Network::ArbitrumSepolia, true);

        let result = adapter.execute(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, PaymentStatus::Completed);
        assert_eq!(result.metadata.get("bridge_version"), Some(&json!("v2")));
        assert_eq!(result.metadata.get("source_domain"), Some(&json!(6)));
        assert_eq!(result.metadata.get("destination_domain"), Some(&json!(3)));
        assert_eq!(result.metadata.get("mint"), Some(&json!("relayer")));
        assert!(result.metadata.contains_key("attestation_url"));

        // approve then depositForBurn, in that order; no mint call.
        let signatures = custody.signatures();
        assert_eq!(signatures.len(), 2);
        assert!(signatures[0].starts_with("approve("));
        assert!(signatures[1].starts_with("depositForBurn("));
    }

    #[tokio::test]
    async fn test_standard_transfer_self_mints_via_executor_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/messages/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_attestation()))
            .mount(&server)
            .await;

        let executor = WalletInfo {
            id: "dest-wallet".into(),
            address: format!("0x{}", "d".repeat(40)),
            wallet_set_id: None,
            network: Network::ArbitrumSepolia,
            frozen: false,
        };
        let custody = FakeCustody::new(vec![executor]);
        let adapter = BridgeAdapter::with_options(
            Arc::clone(&custody) as Arc<dyn CustodyProvider>,
            fast_options(server.uri()),
        );
        let request = request_to(Network::ArbitrumSepolia, false);

        let result = adapter.execute(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metadata.get("mint"), Some(&json!("self")));

        let signatures = custody.signatures();
        assert_eq!(signatures.len(), 3);
        assert!(signatures[2].starts_with("receiveMessage("));
        // The mint ran from the destination-side wallet.
        assert_eq!(custody.calls.lock().unwrap()[2].wallet_id, "dest-wallet");
    }

    #[tokio::test]
    async fn test_standard_transfer_without_executor_fails_reconcilable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/messages/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(complete_attestation()))
            .mount(&server)
            .await;

        let custody = FakeCustody::new(Vec::new());
        let adapter = BridgeAdapter::with_options(custody, fast_options(server.uri()));
        let request = request_to(Network::ArbitrumSepolia, false);

        let result = adapter.execute(&request).await.unwrap();
        assert!(!result.success);
        assert!(result.metadata.contains_key("attestation_url"));
        assert_eq!(result.metadata.get("mint"), Some(&json!("manual_required")));
    }

    #[tokio::test]
    async fn test_attestation_timeout_reports_url_for_reconciliation() {
        let server = MockServer::start().await;
        // Never indexed: the poll sees 404 until the bound elapses.
        Mock::given(method("GET"))
            .and(path("/v2/messages/6"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let custody = FakeCustody::new(Vec::new());
        let adapter = BridgeAdapter::with_options(custody, fast_options(server.uri()));
        let request = request_to(Network::ArbitrumSepolia, true);

        let result = adapter.execute(&request).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().kind, "timeout");
        // Burn happened; the metadata carries everything needed to finish
        // the transfer manually.
        assert!(result.metadata.contains_key("burn_tx_hash"));
        let url = result.metadata.get("attestation_url").unwrap().as_str().unwrap();
        assert!(url.contains("/v2/messages/6"));
    }

    #[tokio::test]
    async fn test_same_network_delegates_to_direct_transfer() {
        let custody = FakeCustody::new(Vec::new());
        let adapter = BridgeAdapter::new(Arc::clone(&custody) as Arc<dyn CustodyProvider>);
        let request = request_to(Network::BaseSepolia, true);

        let result = adapter.execute(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metadata.get("same_network"), Some(&json!(true)));
        assert!(custody.signatures().is_empty());
        assert_eq!(result.tx_hash.as_deref(), Some("0xdirect"));
    }

    #[test]
    fn test_supports_only_with_destination() {
        let adapter = BridgeAdapter::new(FakeCustody::new(Vec::new()));
        let mut request = request_to(Network::ArbitrumSepolia, true);
        assert!(adapter.supports(&request));
        request.destination_network = None;
        assert!(!adapter.supports(&request));
    }

    #[test]
    fn test_subunits_and_bytes32() {
        assert_eq!(BridgeAdapter::subunits(Decimal::new(25, 0)), "25000000");
        assert_eq!(BridgeAdapter::subunits(Decimal::new(5, 1)), "500000");
        let padded = BridgeAdapter::bytes32_address(&format!("0x{}", "AB".repeat(20)));
        assert_eq!(padded.len(), 66);
        assert!(padded.starts_with("0x000000000000000000000000"));
        assert!(padded.ends_with(&"ab".repeat(20)));
    }

    #[tokio::test]
    async fn test_simulate_checks_bridgeability() {
        let custody = FakeCustody::new(Vec::new());
        let adapter = BridgeAdapter::new(Arc::clone(&custody) as Arc<dyn CustodyProvider>);

        let ok = adapter
            .simulate(&request_to(Network::ArbitrumSepolia, true))
            .await
            .unwrap();
        assert!(ok.would_succeed);
        assert!(ok.estimated_fee.is_some());

        let mut request = request_to(Network::ArbitrumSepolia, true);
        request.amount = Decimal::new(100_000, 0);
        let poor = adapter.simulate(&request).await.unwrap();
        assert!(!poor.would_succeed);
    }
}
