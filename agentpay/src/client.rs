//! The payment orchestrator.
//!
//! [`PaymentClient`] binds storage, guards, the fund lock, the reservation
//! registry, the circuit breaker, the retry policy, the router, and the
//! audit ledger into one pipeline behind `pay`. Every step that mutates
//! shared state is unwound when a later step fails: guard counters are
//! released, reservations dropped, the ledger entry moved to a terminal
//! status, and the fund lock released.
//!
//! The pipeline, in order:
//!
//! 1. record a pending ledger entry
//! 2. consult the trust hook (optional)
//! 3. reserve the guard chain
//! 4. acquire the per-wallet fund lock
//! 5. live-read balance and subtract open reservations
//! 6. enter the circuit breaker for the custody service
//! 7. route and execute per the resilience strategy
//! 8. commit or release the guard tokens
//! 9. move the ledger entry to its terminal status
//! 10. release the fund lock
//!
//! Payment-level failures (guard blocks, balance shortfalls, busy wallets,
//! routing and upstream failures) come back as a non-success
//! [`PaymentResult`] carrying the stable error kind; only malformed
//! requests and storage faults surface as `Err`.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch;
use crate::circuit::{Admission, CircuitBreaker};
use crate::config::{Config, StorageKind};
use crate::custody::{CustodyProvider, TransactionState};
use crate::error::PaymentError;
use crate::guard::{Approver, GuardChain, GuardConfig, GuardManager, PaymentContext};
use crate::intent::{IntentService, IntentStatus, NewIntent, PaymentIntent};
use crate::ledger::{Ledger, LedgerEntry, LedgerQuery, StatusUpdate};
use crate::lock::{FundLock, LockOptions};
use crate::reservation::ReservationRegistry;
use crate::retry::RetryPolicy;
use crate::route::{Adapter, AdapterRequest, Router};
use crate::storage::{MemoryStorage, Storage};
use crate::timestamp::now_unix;
use crate::transfer::TransferAdapter;
use crate::trust::{TrustHook, TrustVerdict};
use crate::types::{
    BatchResult, ErrorInfo, Metadata, PaymentMethod, PaymentRequest, PaymentResult, PaymentStatus,
    SimulationResult, TrustCheck, WalletInfo,
};

/// Circuit breaker service name for the custody provider.
pub const CUSTODY_SERVICE: &str = "custody_api";

/// Builder for [`PaymentClient`].
pub struct PaymentClientBuilder {
    custody: Arc<dyn CustodyProvider>,
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    trust: Option<Arc<dyn TrustHook>>,
    approver: Option<Arc<dyn Approver>>,
    adapters: Vec<Arc<dyn Adapter>>,
    circuit: Option<CircuitBreaker>,
    retry: RetryPolicy,
    lock_options: LockOptions,
}

impl std::fmt::Debug for PaymentClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentClientBuilder")
            .field("adapters", &self.adapters.len())
            .finish_non_exhaustive()
    }
}

impl PaymentClientBuilder {
    /// Overrides the configuration (default: [`Config::from_env`]).
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Supplies the storage backend explicitly.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Installs the pre-flight trust hook.
    #[must_use]
    pub fn trust_hook(mut self, hook: Arc<dyn TrustHook>) -> Self {
        self.trust = Some(hook);
        self
    }

    /// Installs the confirmation approver injected into rebuilt
    /// confirmation guards.
    #[must_use]
    pub fn approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    /// Registers an additional transport adapter (the direct transfer
    /// adapter is always registered).
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Overrides the custody circuit breaker (for tuning).
    #[must_use]
    pub fn circuit_breaker(mut self, circuit: CircuitBreaker) -> Self {
        self.circuit = Some(circuit);
        self
    }

    /// Overrides the retry policy used by the retry-then-fail strategy.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides fund lock tuning.
    #[must_use]
    pub fn lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Configuration`] when the configuration
    /// selects the redis backend but no storage was supplied (the network
    /// backend lives in the `agentpay-redis` crate).
    pub fn build(self) -> Result<PaymentClient, PaymentError> {
        let storage = match (self.storage, self.config.storage) {
            (Some(storage), _) => storage,
            (None, StorageKind::Memory) => Arc::new(MemoryStorage::new()) as Arc<dyn Storage>,
            (None, StorageKind::Redis) => {
                return Err(PaymentError::Configuration(
                    "redis storage selected but no backend supplied; pass one via .storage(...)"
                        .into(),
                ))
            }
        };

        let mut router = Router::new();
        router.register(Arc::new(TransferAdapter::new(Arc::clone(&self.custody))));
        for adapter in self.adapters {
            router.register(adapter);
        }

        let circuit = self
            .circuit
            .unwrap_or_else(|| CircuitBreaker::new(Arc::clone(&storage), CUSTODY_SERVICE));

        Ok(PaymentClient {
            ledger: Ledger::new(Arc::clone(&storage)),
            fund_lock: FundLock::new(Arc::clone(&storage)),
            guards: GuardManager::new(Arc::clone(&storage), self.approver),
            reservations: ReservationRegistry::new(Arc::clone(&storage)),
            intents: IntentService::new(Arc::clone(&storage)),
            storage,
            custody: self.custody,
            router,
            circuit,
            retry: self.retry,
            trust: self.trust,
            lock_options: self.lock_options,
            config: self.config,
        })
    }
}

/// The single entry point for guarded, routed, resilient payments.
pub struct PaymentClient {
    config: Config,
    storage: Arc<dyn Storage>,
    custody: Arc<dyn CustodyProvider>,
    ledger: Ledger,
    fund_lock: FundLock,
    guards: GuardManager,
    reservations: ReservationRegistry,
    intents: IntentService,
    router: Router,
    circuit: CircuitBreaker,
    retry: RetryPolicy,
    trust: Option<Arc<dyn TrustHook>>,
    lock_options: LockOptions,
}

impl std::fmt::Debug for PaymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentClient")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl PaymentClient {
    /// Starts building a client around a custody capability.
    #[must_use]
    pub fn builder(custody: Arc<dyn CustodyProvider>) -> PaymentClientBuilder {
        PaymentClientBuilder {
            custody,
            config: Config::from_env(),
            storage: None,
            trust: None,
            approver: None,
            adapters: Vec::new(),
            circuit: None,
            retry: RetryPolicy::default(),
            lock_options: LockOptions::default(),
        }
    }

    /// The audit ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The guard manager.
    #[must_use]
    pub fn guards(&self) -> &GuardManager {
        &self.guards
    }

    /// The reservation registry.
    #[must_use]
    pub fn reservations(&self) -> &ReservationRegistry {
        &self.reservations
    }

    /// The shared storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Available balance: live balance minus open reservations.
    ///
    /// # Errors
    ///
    /// Propagates custody and storage failures.
    pub async fn available(&self, wallet_id: &str) -> Result<Decimal, PaymentError> {
        let balance = self.custody.balance(wallet_id).await?;
        let reserved = self.reservations.total_for(wallet_id).await?;
        Ok(balance - reserved)
    }

    fn context_for(request: &PaymentRequest) -> PaymentContext {
        PaymentContext {
            wallet_id: request.wallet_id.clone(),
            wallet_set_id: request.wallet_set_id.clone(),
            recipient: request.recipient.clone(),
            amount: request.amount,
            purpose: request.purpose.clone(),
            metadata: request.metadata.clone(),
        }
    }

    fn run_trust(&self, request: &PaymentRequest) -> bool {
        match request.trust_check {
            TrustCheck::On => self.trust.is_some(),
            TrustCheck::Off => false,
            TrustCheck::Auto => self.trust.is_some() && !request.skip_guards,
        }
    }

    /// Claims the idempotency key, returning the previously recorded ledger
    /// entry id when the key was already used.
    async fn claim_idempotency(
        &self,
        key: &str,
        entry_id: &str,
    ) -> Result<Option<String>, PaymentError> {
        use std::sync::Mutex;

        let prior: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let prior_in_mutator = Arc::clone(&prior);
        let entry_id = entry_id.to_owned();
        self.storage
            .update(
                &format!("idem:{key}"),
                Box::new(move |current| match current {
                    Some(existing) => {
                        *prior_in_mutator.lock().expect("idem lock") = existing
                            .get("entry_id")
                            .and_then(|v| v.as_str())
                            .map(ToOwned::to_owned);
                        Some(existing)
                    }
                    None => {
                        *prior_in_mutator.lock().expect("idem lock") = None;
                        Some(json!({ "entry_id": entry_id.clone(), "at": now_unix() }))
                    }
                }),
            )
            .await?;
        let prior = prior.lock().expect("idem lock").take();
        Ok(prior)
    }

    fn result_from_entry(entry: &LedgerEntry) -> PaymentResult {
        PaymentResult {
            success: matches!(entry.status, PaymentStatus::Completed | PaymentStatus::Pending),
            status: entry.status,
            method: entry.method.unwrap_or(PaymentMethod::Transfer),
            provider_tx_id: entry.provider_tx_id.clone(),
            tx_hash: entry.tx_hash.clone(),
            amount: entry.amount,
            recipient: entry.recipient.clone(),
            guards_passed: entry.guards_passed.clone(),
            error: None,
            ledger_entry_id: Some(entry.id.clone()),
            metadata: entry.metadata.clone(),
        }
    }

    /// Executes a payment through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Validation`] for malformed requests (never
    /// recorded in the ledger) and propagates storage faults. Payment-level
    /// failures are reported in the returned [`PaymentResult`].
    pub async fn pay(&self, request: PaymentRequest) -> Result<PaymentResult, PaymentError> {
        self.pay_internal(request, None).await
    }

    pub(crate) async fn pay_internal(
        &self,
        mut request: PaymentRequest,
        consume_intent: Option<&str>,
    ) -> Result<PaymentResult, PaymentError> {
        request.validate()?;

        let idempotency_key = request
            .idempotency_key
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let mut entry = LedgerEntry::new(&request.wallet_id, &request.recipient, request.amount)
            .with_wallet_set(request.wallet_set_id.clone())
            .with_purpose(request.purpose.clone())
            .with_metadata(request.metadata.clone());
        entry
            .metadata
            .insert("idempotency_key".into(), json!(idempotency_key));

        // Replays of the same idempotency key return the recorded outcome
        // without touching custody again.
        if let Some(prior_entry_id) = self
            .claim_idempotency(&idempotency_key, &entry.id)
            .await?
        {
            info!(
                idempotency_key,
                entry_id = prior_entry_id,
                "replaying idempotent payment result"
            );
            if let Some(prior) = self.ledger.get(&prior_entry_id).await? {
                return Ok(Self::result_from_entry(&prior));
            }
            // The owning call claimed the key but has not recorded its
            // entry yet; report it as in flight rather than paying twice.
            let mut result = PaymentResult::failure(
                self.probable_method(&request),
                request.amount,
                request.recipient.clone(),
                &PaymentError::WalletBusy,
            );
            result.status = PaymentStatus::Pending;
            result.ledger_entry_id = Some(prior_entry_id);
            return Ok(result);
        }

        // Step 1: the attempt is on the ledger before any external effect.
        self.ledger.record(&entry).await?;
        let entry_id = entry.id.clone();

        // Step 2: trust hook.
        if self.run_trust(&request) {
            if let Some(hook) = &self.trust {
                let decision = hook
                    .evaluate(&request.wallet_id, &request.recipient, request.amount)
                    .await?;
                match decision.verdict {
                    TrustVerdict::Approve => {}
                    TrustVerdict::Block => {
                        let reason = decision.reason.unwrap_or_else(|| "trust check failed".into());
                        let err = PaymentError::GuardBlocked {
                            guard: "trust".into(),
                            reason,
                        };
                        self.ledger
                            .update_status(
                                &entry_id,
                                StatusUpdate::to(PaymentStatus::Blocked)
                                    .with_metadata("trust", json!(ErrorInfo::from(&err))),
                            )
                            .await?;
                        return Ok(self.failure_result(&request, &err, &entry_id, Vec::new()));
                    }
                    TrustVerdict::Hold => {
                        return self.hold_for_review(&request, &entry_id, decision.reason).await;
                    }
                }
            }
        }

        // Step 3: reserve the guard chain.
        let chain;
        let mut reservations = Vec::new();
        let mut guards_passed = Vec::new();
        if request.skip_guards {
            chain = GuardChain::new();
        } else {
            chain = self
                .guards
                .chain_for(&request.wallet_id, request.wallet_set_id.as_deref())
                .await?;
            let ctx = Self::context_for(&request);
            match chain.reserve(&ctx).await {
                Ok(tokens) => {
                    guards_passed = chain.names();
                    reservations = tokens;
                }
                Err(err @ PaymentError::GuardBlocked { .. }) => {
                    self.ledger
                        .update_status(
                            &entry_id,
                            StatusUpdate::to(PaymentStatus::Blocked)
                                .with_metadata("guard", json!(ErrorInfo::from(&err))),
                        )
                        .await?;
                    return Ok(self.failure_result(&request, &err, &entry_id, Vec::new()));
                }
                Err(err) => {
                    self.ledger
                        .update_status(&entry_id, StatusUpdate::to(PaymentStatus::Failed))
                        .await?;
                    return Err(err);
                }
            }
        }
        let ctx = Self::context_for(&request);

        // Step 4: per-wallet fund lock.
        let Some(lock_token) = self
            .fund_lock
            .acquire_with(&request.wallet_id, self.lock_options)
            .await?
        else {
            chain.release(&ctx, &reservations).await;
            let err = PaymentError::WalletBusy;
            self.fail_ledger(&entry_id, &err).await?;
            return Ok(self.failure_result(&request, &err, &entry_id, guards_passed));
        };

        // Everything below must release the lock on the way out.
        let outcome = self
            .locked_section(&request, consume_intent, &chain, &reservations, &entry_id)
            .await;
        if let Err(err) = self
            .fund_lock
            .release_with_key(&request.wallet_id, &lock_token)
            .await
        {
            warn!(%err, wallet_id = %request.wallet_id, "fund lock release failed");
        }

        match outcome {
            Ok(mut result) => {
                result.guards_passed = guards_passed;
                result.ledger_entry_id = Some(entry_id);
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    /// Steps 5–9, run while holding the wallet lock.
    ///
    /// Every failure path releases the guard tokens exactly once and moves
    /// the ledger entry to a terminal status before returning.
    async fn locked_section(
        &self,
        request: &PaymentRequest,
        consume_intent: Option<&str>,
        chain: &GuardChain,
        reservations: &[crate::guard::GuardReservation],
        entry_id: &str,
    ) -> Result<PaymentResult, PaymentError> {
        let ctx = Self::context_for(request);

        // Confirming an intent: its hold is replaced by this execution now
        // that the wallet is locked.
        if let Some(intent_id) = consume_intent {
            if let Err(err) = self.reservations.release(intent_id).await {
                chain.release(&ctx, reservations).await;
                self.fail_ledger(entry_id, &err).await?;
                return Ok(self.failure_result(request, &err, entry_id, Vec::new()));
            }
        }

        // Step 5: live balance minus open reservations.
        let wallet = match self.resolve_available(request).await {
            Ok(wallet) => wallet,
            Err(err) => {
                chain.release(&ctx, reservations).await;
                self.fail_ledger(entry_id, &err).await?;
                return Ok(self.failure_result(request, &err, entry_id, Vec::new()));
            }
        };

        let adapter_request = self.adapter_request(request, wallet);

        // Step 6: circuit breaker scope.
        let admission = match self.circuit.admit().await {
            Ok(admission) => admission,
            Err(err) => {
                chain.release(&ctx, reservations).await;
                self.fail_ledger(entry_id, &err).await?;
                return Ok(self.failure_result(request, &err, entry_id, Vec::new()));
            }
        };
        if let Admission::Rejected { recovery_at } = admission {
            chain.release(&ctx, reservations).await;
            if request.strategy == crate::types::ResilienceStrategy::QueueBackground {
                return self.queue_payment(request, entry_id).await;
            }
            let err = self.circuit.open_error(recovery_at);
            self.fail_ledger(entry_id, &err).await?;
            return Ok(self.failure_result(request, &err, entry_id, Vec::new()));
        }

        // Step 7: route and execute per strategy.
        let attempt = || self.router.execute(&adapter_request);
        let executed = match request.strategy {
            crate::types::ResilienceStrategy::RetryThenFail => self.retry.run(attempt).await,
            _ => attempt().await,
        };

        // Step 8 + 9: settle guards, then the circuit, then the ledger.
        match executed {
            Ok(result) => {
                if result.success {
                    chain.commit(&ctx, reservations).await;
                } else {
                    chain.release(&ctx, reservations).await;
                }
                if let Err(err) = self.circuit.record_success(admission).await {
                    warn!(%err, "circuit success not recorded");
                }
                let status = if result.success {
                    result.status
                } else {
                    PaymentStatus::Failed
                };
                self.ledger
                    .update_status(
                        entry_id,
                        StatusUpdate {
                            status,
                            method: Some(result.method),
                            provider_tx_id: result.provider_tx_id.clone(),
                            tx_hash: result.tx_hash.clone(),
                            guards_passed: result.success.then(|| chain.names()),
                            metadata: result.metadata.clone(),
                        },
                    )
                    .await?;
                Ok(result)
            }
            Err(err) => {
                chain.release(&ctx, reservations).await;
                if let Err(record_err) = self.circuit.record_failure(admission).await {
                    warn!(%record_err, "circuit failure not recorded");
                }
                if request.strategy == crate::types::ResilienceStrategy::QueueBackground {
                    warn!(%err, "payment failed, queueing for background execution");
                    return self.queue_payment(request, entry_id).await;
                }
                self.fail_ledger(entry_id, &err).await?;
                Ok(self.failure_result(request, &err, entry_id, Vec::new()))
            }
        }
    }

    /// Resolves the wallet and verifies `available = balance - reserved`
    /// covers the requested amount.
    async fn resolve_available(
        &self,
        request: &PaymentRequest,
    ) -> Result<WalletInfo, PaymentError> {
        let wallet = self.custody.wallet(&request.wallet_id).await?;
        let balance = self.custody.balance(&request.wallet_id).await?;
        let reserved = self.reservations.total_for(&request.wallet_id).await?;
        let available = balance - reserved;
        if available < request.amount {
            return Err(PaymentError::InsufficientBalance {
                available,
                required: request.amount,
            });
        }
        Ok(wallet)
    }

    fn adapter_request(&self, request: &PaymentRequest, wallet: WalletInfo) -> AdapterRequest {
        AdapterRequest {
            wallet,
            recipient: request.recipient.clone(),
            amount: request.amount,
            fee_level: request.fee_level,
            idempotency_key: request
                .idempotency_key
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            destination_network: request.destination_network,
            purpose: request.purpose.clone(),
            timeout: request.timeout,
            wait_for_confirmation: request.wait_for_confirmation,
            fast_transfer: true,
            metadata: request.metadata.clone(),
        }
    }

    async fn fail_ledger(&self, entry_id: &str, err: &PaymentError) -> Result<(), PaymentError> {
        self.ledger
            .update_status(
                entry_id,
                StatusUpdate::to(PaymentStatus::Failed)
                    .with_metadata("error", json!(ErrorInfo::from(err))),
            )
            .await?;
        Ok(())
    }

    fn failure_result(
        &self,
        request: &PaymentRequest,
        err: &PaymentError,
        entry_id: &str,
        guards_passed: Vec<String>,
    ) -> PaymentResult {
        let mut result = PaymentResult::failure(
            self.probable_method(request),
            request.amount,
            request.recipient.clone(),
            err,
        );
        result.ledger_entry_id = Some(entry_id.to_owned());
        result.guards_passed = guards_passed;
        result
    }

    /// Best-effort method label for failures that never reached routing.
    fn probable_method(&self, request: &PaymentRequest) -> PaymentMethod {
        use crate::types::RecipientKind;
        if request.destination_network.is_some() {
            PaymentMethod::CrossChain
        } else {
            match RecipientKind::classify(&request.recipient) {
                RecipientKind::HttpUrl => PaymentMethod::X402,
                _ => PaymentMethod::Transfer,
            }
        }
    }

    /// Parks a payment as an intent with a fund reservation (used by the
    /// queue-background strategy and trust holds).
    async fn queue_payment(
        &self,
        request: &PaymentRequest,
        entry_id: &str,
    ) -> Result<PaymentResult, PaymentError> {
        let mut intent = self
            .intents
            .create(NewIntent {
                wallet_id: request.wallet_id.clone(),
                recipient: request.recipient.clone(),
                amount: request.amount,
                expires_in: None,
                purpose: request.purpose.clone(),
                metadata: request.metadata.clone(),
            })
            .await?;
        self.reservations
            .reserve(&request.wallet_id, request.amount, &intent.id)
            .await?;
        intent.reserved_amount = Some(request.amount);
        intent.ledger_entry_id = Some(entry_id.to_owned());
        self.intents.save(&intent).await?;

        self.ledger
            .update_status(
                entry_id,
                StatusUpdate::to(PaymentStatus::Pending)
                    .with_metadata("queued", json!(true))
                    .with_metadata("intent_id", json!(intent.id)),
            )
            .await?;
        info!(intent_id = %intent.id, "payment queued as intent");

        let mut metadata = Metadata::new();
        metadata.insert("queued".into(), json!(true));
        metadata.insert("intent_id".into(), json!(intent.id));
        Ok(PaymentResult {
            success: true,
            status: PaymentStatus::Pending,
            method: self.probable_method(request),
            provider_tx_id: None,
            tx_hash: None,
            amount: request.amount,
            recipient: request.recipient.clone(),
            guards_passed: Vec::new(),
            error: None,
            ledger_entry_id: Some(entry_id.to_owned()),
            metadata,
        })
    }

    /// Trust hold: park the payment as an intent awaiting confirmation.
    async fn hold_for_review(
        &self,
        request: &PaymentRequest,
        entry_id: &str,
        reason: Option<String>,
    ) -> Result<PaymentResult, PaymentError> {
        let mut result = self.queue_payment(request, entry_id).await?;
        result.success = false;
        if let Some(reason) = reason {
            result.metadata.insert("trust_hold".into(), json!(reason));
        }
        Ok(result)
    }

    /// Simulates a payment: trust check, guard checks, available balance,
    /// and the selected adapter's own simulation. Acquires no locks and
    /// mutates no counters.
    ///
    /// # Errors
    ///
    /// Propagates storage faults; anything payment-shaped is reported in
    /// the returned [`SimulationResult`].
    pub async fn simulate(&self, request: PaymentRequest) -> Result<SimulationResult, PaymentError> {
        let route_guess = self.probable_method(&request);
        if let Err(err) = request.validate() {
            return Ok(SimulationResult {
                would_succeed: false,
                route: route_guess,
                estimated_fee: None,
                guards_that_would_pass: Vec::new(),
                guards_that_would_fail: Vec::new(),
                reason: Some(err.to_string()),
            });
        }

        if self.run_trust(&request) {
            if let Some(hook) = &self.trust {
                let decision = hook
                    .evaluate(&request.wallet_id, &request.recipient, request.amount)
                    .await?;
                if decision.verdict != TrustVerdict::Approve {
                    return Ok(SimulationResult {
                        would_succeed: false,
                        route: route_guess,
                        estimated_fee: None,
                        guards_that_would_pass: Vec::new(),
                        guards_that_would_fail: Vec::new(),
                        reason: Some(
                            decision
                                .reason
                                .unwrap_or_else(|| "trust check would not approve".into()),
                        ),
                    });
                }
            }
        }

        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut block_reason = None;
        if !request.skip_guards {
            let chain = self
                .guards
                .chain_for(&request.wallet_id, request.wallet_set_id.as_deref())
                .await?;
            let ctx = Self::context_for(&request);
            for decision in chain.check_all(&ctx).await? {
                if decision.allowed {
                    passed.push(decision.guard);
                } else {
                    if block_reason.is_none() {
                        block_reason = Some(format!(
                            "would be blocked by guard '{}': {}",
                            decision.guard,
                            decision.reason.clone().unwrap_or_default()
                        ));
                    }
                    failed.push(decision.guard);
                }
            }
        }
        if let Some(reason) = block_reason {
            return Ok(SimulationResult {
                would_succeed: false,
                route: route_guess,
                estimated_fee: None,
                guards_that_would_pass: passed,
                guards_that_would_fail: failed,
                reason: Some(reason),
            });
        }

        let wallet = match self.custody.wallet(&request.wallet_id).await {
            Ok(wallet) => wallet,
            Err(err) => {
                return Ok(SimulationResult {
                    would_succeed: false,
                    route: route_guess,
                    estimated_fee: None,
                    guards_that_would_pass: passed,
                    guards_that_would_fail: failed,
                    reason: Some(err.to_string()),
                })
            }
        };
        let available = self.available(&request.wallet_id).await?;
        if available < request.amount {
            return Ok(SimulationResult {
                would_succeed: false,
                route: route_guess,
                estimated_fee: None,
                guards_that_would_pass: passed,
                guards_that_would_fail: failed,
                reason: Some(format!(
                    "insufficient available balance: {available} < {}",
                    request.amount
                )),
            });
        }

        let adapter_request = self.adapter_request(&request, wallet);
        let simulation = match self.router.simulate(&adapter_request).await {
            Ok(simulation) => simulation,
            Err(err @ PaymentError::RoutingFailed(_)) => {
                return Ok(SimulationResult {
                    would_succeed: false,
                    route: route_guess,
                    estimated_fee: None,
                    guards_that_would_pass: passed,
                    guards_that_would_fail: failed,
                    reason: Some(err.to_string()),
                })
            }
            Err(err) => return Err(err),
        };

        Ok(SimulationResult {
            would_succeed: simulation.would_succeed,
            route: simulation.route,
            estimated_fee: simulation.estimated_fee,
            guards_that_would_pass: passed,
            guards_that_would_fail: failed,
            reason: simulation.reason,
        })
    }

    /// Runs up to `concurrency` payments in parallel. Each payment is
    /// independent; there is no cross-payment atomicity.
    pub async fn batch_pay(
        &self,
        requests: Vec<PaymentRequest>,
        concurrency: usize,
    ) -> BatchResult {
        batch::process(self, requests, concurrency).await
    }

    // ── Payment intents (authorize / capture) ───────────────────────────

    /// Creates a payment intent: simulates strictly, records a pending
    /// ledger entry, and holds the amount in the reservation registry.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::WalletBusy`] when the wallet lock cannot be
    /// acquired and [`PaymentError::Validation`] when the simulation says
    /// the payment would not succeed.
    pub async fn create_intent(
        &self,
        request: PaymentRequest,
        expires_in: Option<u64>,
    ) -> Result<PaymentIntent, PaymentError> {
        request.validate()?;

        let Some(lock_token) = self
            .fund_lock
            .acquire_with(&request.wallet_id, self.lock_options)
            .await?
        else {
            return Err(PaymentError::WalletBusy);
        };

        let outcome = self.create_intent_locked(&request, expires_in).await;
        if let Err(err) = self
            .fund_lock
            .release_with_key(&request.wallet_id, &lock_token)
            .await
        {
            warn!(%err, wallet_id = %request.wallet_id, "fund lock release failed");
        }
        outcome
    }

    async fn create_intent_locked(
        &self,
        request: &PaymentRequest,
        expires_in: Option<u64>,
    ) -> Result<PaymentIntent, PaymentError> {
        let simulation = self.simulate(request.clone()).await?;
        if !simulation.would_succeed {
            return Err(PaymentError::Validation(format!(
                "authorization failed: {}",
                simulation.reason.unwrap_or_else(|| "simulation failed".into())
            )));
        }

        let mut entry = LedgerEntry::new(&request.wallet_id, &request.recipient, request.amount)
            .with_wallet_set(request.wallet_set_id.clone())
            .with_purpose(request.purpose.clone())
            .with_metadata(request.metadata.clone());

        let mut intent = self
            .intents
            .create(NewIntent {
                wallet_id: request.wallet_id.clone(),
                recipient: request.recipient.clone(),
                amount: request.amount,
                expires_in,
                purpose: request.purpose.clone(),
                metadata: request.metadata.clone(),
            })
            .await?;

        entry.metadata.insert("intent_id".into(), json!(intent.id));
        if let Some(key) = &request.idempotency_key {
            entry.metadata.insert("idempotency_key".into(), json!(key));
        }
        self.ledger.record(&entry).await?;

        self.reservations
            .reserve(&request.wallet_id, request.amount, &intent.id)
            .await?;
        intent.reserved_amount = Some(request.amount);
        intent.ledger_entry_id = Some(entry.id.clone());
        self.intents.save(&intent).await?;
        info!(intent_id = %intent.id, wallet_id = %request.wallet_id, "intent created");
        Ok(intent)
    }

    /// Confirms an intent: transitions it through `processing`, executes
    /// the payment (releasing the reservation inside the wallet lock), and
    /// records the terminal intent status.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::IntentNotFound`],
    /// [`PaymentError::IntentAlreadyTerminal`], or
    /// [`PaymentError::IntentExpired`] per the intent's state.
    pub async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentResult, PaymentError> {
        let intent = self.intents.require(intent_id).await?;
        match intent.status {
            IntentStatus::RequiresConfirmation => {}
            IntentStatus::Processing => {
                return Err(PaymentError::Validation(format!(
                    "intent {intent_id} is already being confirmed"
                )))
            }
            _ => return Err(PaymentError::IntentAlreadyTerminal(intent_id.to_owned())),
        }

        if intent.is_expired(now_unix()) {
            self.expire_intent(&intent).await?;
            return Err(PaymentError::IntentExpired(intent_id.to_owned()));
        }

        self.intents
            .set_status(intent_id, IntentStatus::Processing)
            .await?;

        let mut request =
            PaymentRequest::new(&intent.wallet_id, &intent.recipient, intent.amount);
        request.purpose = intent.purpose.clone();
        request.metadata = intent.metadata.clone();
        if let Some(key) = intent
            .metadata
            .get("idempotency_key")
            .and_then(|v| v.as_str())
        {
            request.idempotency_key = Some(key.to_owned());
        }

        let outcome = self.pay_internal(request, Some(intent_id)).await;
        match &outcome {
            Ok(result) if result.success => {
                self.intents
                    .set_status(intent_id, IntentStatus::Succeeded)
                    .await?;
            }
            _ => {
                self.intents
                    .set_status(intent_id, IntentStatus::Failed)
                    .await?;
                // A failed confirm consumed the hold; the intent is
                // terminal so nothing re-reserves.
            }
        }
        outcome
    }

    /// Cancels an intent and releases its reservation.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::IntentAlreadyTerminal`] when the intent is
    /// terminal, or [`PaymentError::Validation`] while it is processing.
    pub async fn cancel_intent(
        &self,
        intent_id: &str,
        reason: Option<String>,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut intent = self.intents.require(intent_id).await?;
        match intent.status {
            IntentStatus::RequiresConfirmation => {}
            IntentStatus::Processing => {
                return Err(PaymentError::Validation(format!(
                    "intent {intent_id} is being confirmed and cannot be cancelled"
                )))
            }
            // Repeated cancels are idempotent.
            IntentStatus::Cancelled => return Ok(intent),
            _ => return Err(PaymentError::IntentAlreadyTerminal(intent_id.to_owned())),
        }

        self.reservations.release(intent_id).await?;
        intent.status = IntentStatus::Cancelled;
        intent.cancel_reason = reason;
        intent.reserved_amount = None;
        self.intents.save(&intent).await?;
        if let Some(entry_id) = &intent.ledger_entry_id {
            self.ledger
                .update_status(entry_id, StatusUpdate::to(PaymentStatus::Cancelled))
                .await?;
        }
        info!(intent_id, "intent cancelled");
        Ok(intent)
    }

    /// Loads an intent, auto-cancelling it when its expiry has passed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get_intent(&self, intent_id: &str) -> Result<Option<PaymentIntent>, PaymentError> {
        let Some(intent) = self.intents.get(intent_id).await? else {
            return Ok(None);
        };
        if intent.status == IntentStatus::RequiresConfirmation && intent.is_expired(now_unix()) {
            let expired = self.expire_intent(&intent).await?;
            return Ok(Some(expired));
        }
        Ok(Some(intent))
    }

    async fn expire_intent(&self, intent: &PaymentIntent) -> Result<PaymentIntent, PaymentError> {
        debug!(intent_id = %intent.id, "intent expired, auto-cancelling");
        self.reservations.release(&intent.id).await?;
        let mut expired = intent.clone();
        expired.status = IntentStatus::Cancelled;
        expired.cancel_reason = Some("expired".into());
        expired.reserved_amount = None;
        self.intents.save(&expired).await?;
        if let Some(entry_id) = &expired.ledger_entry_id {
            self.ledger
                .update_status(entry_id, StatusUpdate::to(PaymentStatus::Cancelled))
                .await?;
        }
        Ok(expired)
    }

    // ── Ledger helpers ──────────────────────────────────────────────────

    /// Queries the audit ledger.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn ledger_query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, PaymentError> {
        self.ledger.query(query).await
    }

    /// Re-synchronizes a ledger entry against the provider's view of its
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Validation`] when the entry is unknown or
    /// carries no provider transaction id.
    pub async fn sync_transaction(&self, entry_id: &str) -> Result<LedgerEntry, PaymentError> {
        let entry = self
            .ledger
            .get(entry_id)
            .await?
            .ok_or_else(|| PaymentError::Validation(format!("ledger entry not found: {entry_id}")))?;
        let tx_id = entry
            .provider_tx_id
            .clone()
            .ok_or_else(|| PaymentError::Validation("ledger entry has no provider tx id".into()))?;

        let tx = self.custody.transaction(&tx_id).await?;
        let status = match tx.state {
            TransactionState::Complete => Some(PaymentStatus::Completed),
            TransactionState::Failed => Some(PaymentStatus::Failed),
            TransactionState::Cancelled => Some(PaymentStatus::Cancelled),
            _ => None,
        };
        if let Some(status) = status {
            self.ledger
                .update_status(
                    entry_id,
                    StatusUpdate {
                        status,
                        tx_hash: tx.tx_hash.clone(),
                        metadata: {
                            let mut m = Metadata::new();
                            m.insert("last_synced".into(), json!(now_unix()));
                            m.insert("provider_state".into(), json!(tx.state));
                            m
                        },
                        ..StatusUpdate::default()
                    },
                )
                .await?;
        }
        self.ledger
            .get(entry_id)
            .await?
            .ok_or_else(|| PaymentError::Validation(format!("ledger entry not found: {entry_id}")))
    }

    // ── Guard helpers ───────────────────────────────────────────────────

    /// Registers a guard for a wallet.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn add_guard(&self, wallet_id: &str, config: GuardConfig) -> Result<(), PaymentError> {
        self.guards.add(wallet_id, config).await
    }

    /// Registers a guard for a wallet set.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn add_guard_for_set(
        &self,
        wallet_set_id: &str,
        config: GuardConfig,
    ) -> Result<(), PaymentError> {
        self.guards.add_for_set(wallet_set_id, config).await
    }
}
