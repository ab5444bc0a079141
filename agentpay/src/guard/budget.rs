//! Budget guard: windowed spending caps.
//!
//! Enforces up to three caps per scope: rolling 24 hours, rolling 1 hour,
//! and lifetime. Windows are time-based, not calendar-based — the daily cap
//! covers the last 86,400 seconds.
//!
//! Rolling-window usage lives in storage as a pruned list of
//! `{id, amount, at}` records; the limit test, the prune, and the pending
//! append all happen inside one atomic [`Storage::update`] mutation, so the
//! predicate and the counter change are inseparable. The lifetime cap is a
//! plain atomic counter.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::storage::{counter_value, Storage};
use crate::timestamp::now_unix;

use super::{Guard, GuardDecision, GuardScope, PaymentContext};

const DAY_SECS: u64 = 86_400;
const HOUR_SECS: u64 = 3_600;

/// The caps a [`BudgetGuard`] enforces. At least one must be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetLimits {
    /// Rolling 24-hour cap.
    pub daily: Option<Decimal>,
    /// Rolling 1-hour cap.
    pub hourly: Option<Decimal>,
    /// Lifetime cap (never resets).
    pub lifetime: Option<Decimal>,
}

/// One usage record inside a rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowEntry {
    id: String,
    amount: Decimal,
    at: u64,
}

fn parse_entries(value: Option<Value>) -> Vec<WindowEntry> {
    value
        .and_then(|v| v.get("entries").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn entries_value(entries: &[WindowEntry]) -> Value {
    json!({ "entries": entries })
}

/// Reservation token contents; reconstructs the touched keys on release.
#[derive(Debug, Serialize, Deserialize)]
struct BudgetToken {
    scope: String,
    amount: Decimal,
    entry: String,
    windows: Vec<String>,
    lifetime: bool,
}

/// Guard enforcing windowed spending caps.
pub struct BudgetGuard {
    name: String,
    scope: GuardScope,
    limits: BudgetLimits,
    storage: Arc<dyn Storage>,
}

impl BudgetGuard {
    /// Creates a budget guard.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Configuration`] when no cap is set.
    pub fn new(
        storage: Arc<dyn Storage>,
        name: impl Into<String>,
        scope: GuardScope,
        limits: BudgetLimits,
    ) -> Result<Self, PaymentError> {
        if limits.daily.is_none() && limits.hourly.is_none() && limits.lifetime.is_none() {
            return Err(PaymentError::Configuration(
                "budget guard needs at least one limit".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            scope,
            limits,
            storage,
        })
    }

    fn window_key(&self, scope_id: &str, window: &str) -> String {
        format!("budget:{scope_id}:{}:{window}", self.name)
    }

    /// Rolling windows active for this guard: `(name, seconds, limit)`.
    fn rolling_windows(&self) -> Vec<(&'static str, u64, Decimal)> {
        let mut windows = Vec::new();
        if let Some(limit) = self.limits.hourly {
            windows.push(("hour", HOUR_SECS, limit));
        }
        if let Some(limit) = self.limits.daily {
            windows.push(("day", DAY_SECS, limit));
        }
        windows
    }

    /// Sum of still-current usage in a window, read without mutation.
    async fn window_spent(&self, scope_id: &str, window: &str, secs: u64) -> Result<Decimal, PaymentError> {
        let now = now_unix();
        let entries = parse_entries(self.storage.get(&self.window_key(scope_id, window)).await?);
        Ok(entries
            .iter()
            .filter(|e| e.at + secs > now)
            .map(|e| e.amount)
            .sum())
    }

    /// Remaining headroom per configured window, for diagnostics.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn remaining(&self, scope_id: &str) -> Result<BudgetLimits, PaymentError> {
        let mut remaining = BudgetLimits::default();
        if let Some(limit) = self.limits.hourly {
            remaining.hourly = Some(limit - self.window_spent(scope_id, "hour", HOUR_SECS).await?);
        }
        if let Some(limit) = self.limits.daily {
            remaining.daily = Some(limit - self.window_spent(scope_id, "day", DAY_SECS).await?);
        }
        if let Some(limit) = self.limits.lifetime {
            let spent = counter_value(
                self.storage
                    .get(&self.window_key(scope_id, "lifetime"))
                    .await?
                    .as_ref(),
            );
            remaining.lifetime = Some(limit - spent);
        }
        Ok(remaining)
    }

    /// Removes a pending entry from one rolling window.
    async fn remove_entry(&self, scope_id: &str, window: &str, entry_id: &str) -> Result<(), PaymentError> {
        let entry_id = entry_id.to_owned();
        self.storage
            .update(
                &self.window_key(scope_id, window),
                Box::new(move |current| {
                    let mut entries = parse_entries(current);
                    entries.retain(|e| e.id != entry_id);
                    Some(entries_value(&entries))
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Guard for BudgetGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        let scope_id = self.scope.id(ctx);
        for (window, secs, limit) in self.rolling_windows() {
            let spent = self.window_spent(scope_id, window, secs).await?;
            if spent + ctx.amount > limit {
                return Ok(GuardDecision::block(
                    &self.name,
                    format!(
                        "{window} budget exceeded: spent {spent}, limit {limit}, requested {}",
                        ctx.amount
                    ),
                ));
            }
        }
        if let Some(limit) = self.limits.lifetime {
            let spent = counter_value(
                self.storage
                    .get(&self.window_key(scope_id, "lifetime"))
                    .await?
                    .as_ref(),
            );
            if spent + ctx.amount > limit {
                return Ok(GuardDecision::block(
                    &self.name,
                    format!(
                        "lifetime budget exceeded: spent {spent}, limit {limit}, requested {}",
                        ctx.amount
                    ),
                ));
            }
        }
        Ok(GuardDecision::allow(&self.name))
    }

    async fn reserve(&self, ctx: &PaymentContext) -> Result<Option<String>, PaymentError> {
        let scope_id = self.scope.id(ctx).to_owned();
        let amount = ctx.amount;
        let entry_id = Uuid::new_v4().to_string();
        let now = now_unix();

        let mut reserved_windows: Vec<String> = Vec::new();
        let mut reserved_lifetime = false;
        let mut rejection: Option<String> = None;

        for (window, secs, limit) in self.rolling_windows() {
            // The verdict cell is overwritten on every mutator invocation, so
            // an optimistic backend's final application decides.
            let verdict: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let verdict_in_mutator = Arc::clone(&verdict);
            let entry_id_in_mutator = entry_id.clone();
            self.storage
                .update(
                    &self.window_key(&scope_id, window),
                    Box::new(move |current| {
                        let mut entries = parse_entries(current);
                        entries.retain(|e| e.at + secs > now);
                        let spent: Decimal = entries.iter().map(|e| e.amount).sum();
                        if spent + amount > limit {
                            *verdict_in_mutator.lock().expect("verdict lock") = Some(format!(
                                "{window} budget exceeded: spent {spent}, limit {limit}, requested {amount}"
                            ));
                        } else {
                            *verdict_in_mutator.lock().expect("verdict lock") = None;
                            entries.push(WindowEntry {
                                id: entry_id_in_mutator.clone(),
                                amount,
                                at: now,
                            });
                        }
                        Some(entries_value(&entries))
                    }),
                )
                .await?;

            let outcome = verdict.lock().expect("verdict lock").take();
            match outcome {
                Some(reason) => {
                    rejection = Some(reason);
                    break;
                }
                None => reserved_windows.push(window.to_owned()),
            }
        }

        if rejection.is_none() {
            if let Some(limit) = self.limits.lifetime {
                let post = self
                    .storage
                    .atomic_add(&self.window_key(&scope_id, "lifetime"), amount, None)
                    .await?;
                if post > limit {
                    self.storage
                        .atomic_add(&self.window_key(&scope_id, "lifetime"), -amount, None)
                        .await?;
                    rejection = Some(format!(
                        "lifetime budget exceeded: spent {}, limit {limit}, requested {amount}",
                        post - amount
                    ));
                } else {
                    reserved_lifetime = true;
                }
            }
        }

        if let Some(reason) = rejection {
            for window in &reserved_windows {
                self.remove_entry(&scope_id, window, &entry_id).await?;
            }
            return Err(PaymentError::GuardBlocked {
                guard: self.name.clone(),
                reason,
            });
        }

        let token = BudgetToken {
            scope: scope_id,
            amount,
            entry: entry_id,
            windows: reserved_windows,
            lifetime: reserved_lifetime,
        };
        Ok(Some(
            serde_json::to_string(&token).expect("budget token serializes"),
        ))
    }

    async fn release(&self, _ctx: &PaymentContext, token: &str) -> Result<(), PaymentError> {
        let Ok(token) = serde_json::from_str::<BudgetToken>(token) else {
            return Ok(());
        };
        for window in &token.windows {
            self.remove_entry(&token.scope, window, &token.entry).await?;
        }
        if token.lifetime {
            self.storage
                .atomic_add(
                    &self.window_key(&token.scope, "lifetime"),
                    -token.amount,
                    None,
                )
                .await?;
        }
        Ok(())
    }
}
