//! Confirmation guard: external approval above a threshold.
//!
//! The guard itself does not prescribe how approvals happen — the embedder
//! injects an [`Approver`] capability (webhook, chat prompt, policy engine).
//! Absent an approver, payments that need confirmation are blocked.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::PaymentError;

use super::{Guard, GuardDecision, PaymentContext};

/// External approval capability consulted by [`ConfirmGuard`].
#[async_trait]
pub trait Approver: Send + Sync {
    /// Returns `true` to approve the payment.
    async fn approve(&self, ctx: &PaymentContext) -> Result<bool, PaymentError>;
}

/// Guard requiring explicit approval above a threshold (or always).
pub struct ConfirmGuard {
    name: String,
    threshold: Option<Decimal>,
    always: bool,
    approver: Option<Arc<dyn Approver>>,
}

impl ConfirmGuard {
    /// Creates a confirmation guard.
    ///
    /// `threshold` gates which amounts need approval; `always` requires it
    /// for every payment regardless of amount.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        threshold: Option<Decimal>,
        always: bool,
        approver: Option<Arc<dyn Approver>>,
    ) -> Self {
        Self {
            name: name.into(),
            threshold,
            always,
            approver,
        }
    }

    fn needs_confirmation(&self, amount: Decimal) -> bool {
        if self.always {
            return true;
        }
        self.threshold.is_some_and(|t| amount >= t)
    }
}

#[async_trait]
impl Guard for ConfirmGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        if !self.needs_confirmation(ctx.amount) {
            return Ok(GuardDecision::allow(&self.name));
        }

        let Some(approver) = &self.approver else {
            return Ok(GuardDecision::block(
                &self.name,
                format!(
                    "payment of {} requires confirmation and no approver is configured",
                    ctx.amount
                ),
            ));
        };

        match approver.approve(ctx).await {
            Ok(true) => Ok(GuardDecision::allow(&self.name)),
            Ok(false) => Ok(GuardDecision::block(&self.name, "payment not approved")),
            Err(err) => {
                warn!(%err, "approver failed; blocking");
                Ok(GuardDecision::block(
                    &self.name,
                    format!("approval failed: {err}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::testutil::ctx;

    struct FixedApprover(bool);

    #[async_trait]
    impl Approver for FixedApprover {
        async fn approve(&self, _ctx: &PaymentContext) -> Result<bool, PaymentError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_below_threshold_passes_without_approver() {
        let guard = ConfirmGuard::new("confirm", Some(Decimal::new(100, 0)), false, None);
        assert!(guard
            .check(&ctx("w", "r", Decimal::new(50, 0)))
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_above_threshold_blocks_without_approver() {
        let guard = ConfirmGuard::new("confirm", Some(Decimal::new(100, 0)), false, None);
        assert!(!guard
            .check(&ctx("w", "r", Decimal::new(100, 0)))
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_approver_decides() {
        let yes = ConfirmGuard::new(
            "confirm",
            None,
            true,
            Some(Arc::new(FixedApprover(true))),
        );
        assert!(yes.check(&ctx("w", "r", Decimal::ONE)).await.unwrap().allowed);

        let no = ConfirmGuard::new(
            "confirm",
            None,
            true,
            Some(Arc::new(FixedApprover(false))),
        );
        assert!(!no.check(&ctx("w", "r", Decimal::ONE)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_approver_error_blocks() {
        struct Failing;

        #[async_trait]
        impl Approver for Failing {
            async fn approve(&self, _ctx: &PaymentContext) -> Result<bool, PaymentError> {
                Err(PaymentError::Network("approval service down".into()))
            }
        }

        let guard = ConfirmGuard::new("confirm", None, true, Some(Arc::new(Failing)));
        let decision = guard.check(&ctx("w", "r", Decimal::ONE)).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("approval failed"));
    }
}
