//! Single-transaction amount bounds.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::PaymentError;

use super::{Guard, GuardDecision, PaymentContext};

/// Stateless guard enforcing `min ≤ amount ≤ max` per payment.
#[derive(Debug, Clone)]
pub struct SingleTxGuard {
    name: String,
    max_amount: Decimal,
    min_amount: Decimal,
}

impl SingleTxGuard {
    /// Creates a single-transaction guard. `min_amount` defaults to zero.
    #[must_use]
    pub fn new(name: impl Into<String>, max_amount: Decimal, min_amount: Option<Decimal>) -> Self {
        Self {
            name: name.into(),
            max_amount,
            min_amount: min_amount.unwrap_or(Decimal::ZERO),
        }
    }

    /// Maximum allowed amount per payment.
    #[must_use]
    pub const fn max_amount(&self) -> Decimal {
        self.max_amount
    }

    /// Minimum allowed amount per payment.
    #[must_use]
    pub const fn min_amount(&self) -> Decimal {
        self.min_amount
    }
}

#[async_trait]
impl Guard for SingleTxGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        if ctx.amount > self.max_amount {
            return Ok(GuardDecision::block(
                &self.name,
                format!("amount {} exceeds maximum {}", ctx.amount, self.max_amount),
            ));
        }
        if ctx.amount < self.min_amount {
            return Ok(GuardDecision::block(
                &self.name,
                format!("amount {} below minimum {}", ctx.amount, self.min_amount),
            ));
        }
        Ok(GuardDecision::allow(&self.name))
    }
}
