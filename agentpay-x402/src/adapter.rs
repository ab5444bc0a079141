//! The HTTP-402 adapter.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use agentpay::custody::{CustodyProvider, TransferRequest};
use agentpay::route::{Adapter, AdapterRequest, AdapterSimulation, PRIORITY_X402};
use agentpay::types::{ErrorInfo, Metadata, PaymentMethod, PaymentResult, PaymentStatus, RecipientKind};
use agentpay::{Network, PaymentError};

use crate::headers::{
    encode_proof, PaymentDescriptor, PaymentProof, HEADER_PAYMENT_REQUIRED,
    HEADER_PAYMENT_RESPONSE,
};

/// Default probe/retry timeout when the request carries no deadline.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Evidence that funds moved for a 402 settlement.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    /// Custody provider transaction id.
    pub provider_tx_id: Option<String>,
    /// On-chain transaction hash, for the payment proof.
    pub tx_hash: Option<String>,
}

/// Capability for settling a 402 descriptor whose network differs from the
/// paying wallet's network (implemented by the cross-chain adapter).
#[async_trait]
pub trait CrossNetworkSettler: Send + Sync {
    /// Moves `amount` to `pay_to` on `network`, sourcing from the request's
    /// wallet.
    async fn settle(
        &self,
        request: &AdapterRequest,
        pay_to: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<SettlementReceipt, PaymentError>;
}

/// Adapter for `402 Payment Required` counterparties.
pub struct X402Adapter {
    custody: Arc<dyn CustodyProvider>,
    http: reqwest::Client,
    settler: Option<Arc<dyn CrossNetworkSettler>>,
}

impl std::fmt::Debug for X402Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Adapter")
            .field("settler", &self.settler.is_some())
            .finish_non_exhaustive()
    }
}

fn http_error(context: &str, err: &reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Network(format!("{context}: request timed out"))
    } else {
        PaymentError::Network(format!("{context}: {err}"))
    }
}

impl X402Adapter {
    /// Creates an adapter that settles through the custody wallet.
    #[must_use]
    pub fn new(custody: Arc<dyn CustodyProvider>) -> Self {
        Self {
            custody,
            http: reqwest::Client::new(),
            settler: None,
        }
    }

    /// Installs a settler for descriptors naming a different network than
    /// the paying wallet's.
    #[must_use]
    pub fn with_settler(mut self, settler: Arc<dyn CrossNetworkSettler>) -> Self {
        self.settler = Some(settler);
        self
    }

    /// Overrides the HTTP client (custom timeouts, proxies).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn timeout_for(request: &AdapterRequest) -> Duration {
        request.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    /// Probes the URL and extracts the payment descriptor from a 402.
    async fn probe(
        &self,
        request: &AdapterRequest,
    ) -> Result<(StatusCode, Option<PaymentDescriptor>), PaymentError> {
        let url = Url::parse(&request.recipient)
            .map_err(|e| PaymentError::Validation(format!("invalid recipient URL: {e}")))?;
        let response = self
            .http
            .get(url)
            .timeout(Self::timeout_for(request))
            .send()
            .await
            .map_err(|e| http_error("probe failed", &e))?;
        let status = response.status();

        if status != StatusCode::PAYMENT_REQUIRED {
            return Ok((status, None));
        }

        // Header descriptor (v1) wins; fall back to body fields (v2).
        let header_descriptor = response
            .headers()
            .get(HEADER_PAYMENT_REQUIRED)
            .and_then(|h| h.to_str().ok())
            .map(|h| PaymentDescriptor::from_header(h, &request.recipient));
        if let Some(Ok(descriptor)) = header_descriptor {
            return Ok((status, Some(descriptor)));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((
            status,
            PaymentDescriptor::from_body(&body, &request.recipient),
        ))
    }

    /// Settles the descriptor and returns the evidence for the proof.
    async fn settle(
        &self,
        request: &AdapterRequest,
        descriptor: &PaymentDescriptor,
        amount: Decimal,
    ) -> Result<SettlementReceipt, PaymentError> {
        let seller_network = if descriptor.network.is_empty() {
            request.wallet.network
        } else {
            Network::from_str(&descriptor.network).map_err(|_| {
                PaymentError::Protocol(format!(
                    "unknown network in payment descriptor: {}",
                    descriptor.network
                ))
            })?
        };

        if seller_network == request.wallet.network {
            let mut tx = self
                .custody
                .transfer(TransferRequest {
                    wallet_id: request.wallet.id.clone(),
                    destination_address: descriptor.pay_to.clone(),
                    amount,
                    fee_level: request.fee_level,
                    idempotency_key: Some(request.idempotency_key.clone()),
                })
                .await?;
            // The proof needs the on-chain hash; poll until the provider
            // reports one (or the transfer settles without it).
            let deadline = std::time::Instant::now() + Self::timeout_for(request);
            while tx.tx_hash.is_none() && !tx.state.is_terminal() {
                if std::time::Instant::now() >= deadline {
                    return Err(PaymentError::Timeout(format!(
                        "settlement {} produced no transaction hash in time",
                        tx.id
                    )));
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                tx = self.custody.transaction(&tx.id).await?;
            }
            return Ok(SettlementReceipt {
                provider_tx_id: Some(tx.id),
                tx_hash: tx.tx_hash,
            });
        }

        let Some(settler) = &self.settler else {
            return Err(PaymentError::Protocol(format!(
                "descriptor wants payment on {seller_network} but wallet is on {} and no cross-network settler is configured",
                request.wallet.network
            )));
        };
        info!(
            from = %request.wallet.network,
            to = %seller_network,
            "settling 402 across networks"
        );
        settler
            .settle(request, &descriptor.pay_to, amount, seller_network)
            .await
    }

    fn result(
        request: &AdapterRequest,
        status: PaymentStatus,
        amount: Decimal,
        receipt: Option<&SettlementReceipt>,
        error: Option<ErrorInfo>,
        metadata: Metadata,
    ) -> PaymentResult {
        PaymentResult {
            success: error.is_none(),
            status,
            method: PaymentMethod::X402,
            provider_tx_id: receipt.and_then(|r| r.provider_tx_id.clone()),
            tx_hash: receipt.and_then(|r| r.tx_hash.clone()),
            amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error,
            ledger_entry_id: None,
            metadata,
        }
    }
}

#[async_trait]
impl Adapter for X402Adapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::X402
    }

    fn priority(&self) -> u8 {
        PRIORITY_X402
    }

    fn supports(&self, request: &AdapterRequest) -> bool {
        if request.is_cross_network() {
            return false;
        }
        RecipientKind::classify(&request.recipient) == RecipientKind::HttpUrl
    }

    async fn simulate(&self, request: &AdapterRequest) -> Result<AdapterSimulation, PaymentError> {
        let (status, descriptor) = self.probe(request).await?;

        if status != StatusCode::PAYMENT_REQUIRED {
            if status.is_client_error() || status.is_server_error() {
                return Ok(AdapterSimulation::fail(
                    PaymentMethod::X402,
                    format!("probe returned HTTP {status}"),
                ));
            }
            return Ok(AdapterSimulation {
                reason: Some("resource does not require payment".into()),
                ..AdapterSimulation::ok(PaymentMethod::X402)
            });
        }

        let Some(descriptor) = descriptor else {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::X402,
                "402 response carried no payment descriptor",
            ));
        };

        let required = descriptor.amount_tokens();
        if required > request.amount {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::X402,
                format!("counterparty requires {required}, request allows {}", request.amount),
            ));
        }
        let balance = self.custody.balance(&request.wallet.id).await?;
        if balance < required {
            return Ok(AdapterSimulation::fail(
                PaymentMethod::X402,
                format!("insufficient balance: {balance} < {required}"),
            ));
        }
        Ok(AdapterSimulation {
            estimated_fee: Some(Decimal::ZERO),
            ..AdapterSimulation::ok(PaymentMethod::X402)
        })
    }

    async fn execute(&self, request: &AdapterRequest) -> Result<PaymentResult, PaymentError> {
        let (status, descriptor) = self.probe(request).await?;

        if status != StatusCode::PAYMENT_REQUIRED {
            // The counterparty must speak 402; other errors are protocol
            // violations, and success means nothing was owed.
            if status.is_client_error() || status.is_server_error() {
                return Err(PaymentError::Protocol(format!(
                    "probe returned HTTP {status}, expected 402"
                )));
            }
            debug!(url = %request.recipient, %status, "no payment required");
            let mut metadata = Metadata::new();
            metadata.insert("http_status".into(), json!(status.as_u16()));
            metadata.insert("note".into(), json!("no payment required"));
            return Ok(Self::result(
                request,
                PaymentStatus::Completed,
                Decimal::ZERO,
                None,
                None,
                metadata,
            ));
        }

        let descriptor = descriptor.ok_or_else(|| {
            PaymentError::Protocol("402 response carried no payment descriptor".into())
        })?;

        let required = descriptor.amount_tokens();
        if required > request.amount {
            let err_info = ErrorInfo {
                kind: "validation_error".into(),
                message: format!(
                    "counterparty requires {required}, request allows {}",
                    request.amount
                ),
            };
            return Ok(Self::result(
                request,
                PaymentStatus::Failed,
                required,
                None,
                Some(err_info),
                Metadata::new(),
            ));
        }

        // Move the funds, then prove it.
        let receipt = self.settle(request, &descriptor, required).await?;

        let proof = PaymentProof {
            x402_version: descriptor.version,
            scheme: descriptor.scheme.clone(),
            network: descriptor.network.clone(),
            resource: request.recipient.clone(),
            payload: json!({
                "transactionHash": receipt.tx_hash,
                "fromAddress": request.wallet.address,
                "toAddress": descriptor.pay_to,
                "amount": required.to_string(),
            }),
        };
        let header_value = encode_proof(&proof).map_err(PaymentError::from)?;

        let retried = self
            .http
            .get(&request.recipient)
            .header(proof.header_name(), header_value)
            .timeout(Self::timeout_for(request))
            .send()
            .await
            .map_err(|e| http_error("paid retry failed", &e))?;

        let mut metadata = Metadata::new();
        metadata.insert("http_status".into(), json!(retried.status().as_u16()));
        metadata.insert("descriptor_version".into(), json!(descriptor.version));
        if let Some(ack) = retried
            .headers()
            .get(HEADER_PAYMENT_RESPONSE)
            .and_then(|h| h.to_str().ok())
        {
            metadata.insert("payment_response".into(), json!(ack));
        }

        if retried.status().is_success() {
            if let Ok(body) = retried.json::<Value>().await {
                metadata.insert("resource".into(), body);
            }
            info!(url = %request.recipient, amount = %required, "402 payment accepted");
            return Ok(Self::result(
                request,
                PaymentStatus::Completed,
                required,
                Some(&receipt),
                None,
                metadata,
            ));
        }

        // Funds moved but the counterparty refused the proof; surface the
        // settlement identifiers for reconciliation.
        let err_info = ErrorInfo {
            kind: "protocol_error".into(),
            message: format!("payment proof rejected: HTTP {}", retried.status()),
        };
        Ok(Self::result(
            request,
            PaymentStatus::Failed,
            required,
            Some(&receipt),
            Some(err_info),
            metadata,
        ))
    }
}
