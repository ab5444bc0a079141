//! Optional pre-flight trust hook.
//!
//! An embedder-provided capability consulted before guards run. Its
//! internals (registry lookups, scoring, caching) are outside the core; the
//! pipeline only honors the verdict: approve proceeds, block ends the
//! payment as blocked, hold parks it as a payment intent awaiting
//! confirmation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Verdict of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustVerdict {
    /// Proceed with the payment.
    Approve,
    /// Park the payment as an intent pending confirmation.
    Hold,
    /// Refuse the payment.
    Block,
}

/// A trust evaluation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustDecision {
    /// The verdict.
    pub verdict: TrustVerdict,
    /// Optional score produced by the hook (e.g. a weighted trust score).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Why the hook held or blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TrustDecision {
    /// An approval.
    #[must_use]
    pub const fn approve() -> Self {
        Self {
            verdict: TrustVerdict::Approve,
            score: None,
            reason: None,
        }
    }

    /// A block with a reason.
    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            verdict: TrustVerdict::Block,
            score: None,
            reason: Some(reason.into()),
        }
    }

    /// A hold with a reason.
    #[must_use]
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            verdict: TrustVerdict::Hold,
            score: None,
            reason: Some(reason.into()),
        }
    }
}

/// Pre-flight recipient trust capability.
#[async_trait]
pub trait TrustHook: Send + Sync {
    /// Evaluates a prospective payment.
    async fn evaluate(
        &self,
        wallet_id: &str,
        recipient: &str,
        amount: Decimal,
    ) -> Result<TrustDecision, PaymentError>;
}
