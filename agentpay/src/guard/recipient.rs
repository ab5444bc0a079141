//! Recipient access control.
//!
//! Matches recipients against exact addresses, URL domain substrings, and
//! regex patterns — evaluated in that order. In whitelist mode only matches
//! are allowed; in blacklist mode matches are blocked.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;

use crate::error::PaymentError;

use super::manager::RecipientMode;
use super::{Guard, GuardDecision, PaymentContext};

/// Stateless guard controlling which recipients may be paid.
#[derive(Debug)]
pub struct RecipientGuard {
    name: String,
    mode: RecipientMode,
    addresses: BTreeSet<String>,
    domains: Vec<String>,
    patterns: Vec<Regex>,
}

impl RecipientGuard {
    /// Creates a recipient guard.
    ///
    /// Addresses and domains are matched case-insensitively; patterns are
    /// compiled case-insensitive regexes.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Configuration`] for an invalid pattern.
    pub fn new(
        name: impl Into<String>,
        mode: RecipientMode,
        addresses: &[String],
        domains: &[String],
        patterns: &[String],
    ) -> Result<Self, PaymentError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map_err(|e| PaymentError::Configuration(format!("invalid pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            mode,
            addresses: addresses.iter().map(|a| a.to_lowercase()).collect(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
            patterns: compiled,
        })
    }

    /// The configured mode.
    #[must_use]
    pub const fn mode(&self) -> RecipientMode {
        self.mode
    }

    /// Exact address, then domain substring, then pattern.
    fn matches(&self, recipient: &str) -> bool {
        let lowered = recipient.to_lowercase();
        if self.addresses.contains(&lowered) {
            return true;
        }
        if self.domains.iter().any(|d| lowered.contains(d)) {
            return true;
        }
        self.patterns.iter().any(|p| p.is_match(recipient))
    }
}

#[async_trait]
impl Guard for RecipientGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PaymentContext) -> Result<GuardDecision, PaymentError> {
        let matched = self.matches(&ctx.recipient);
        let decision = match (self.mode, matched) {
            (RecipientMode::Whitelist, true) | (RecipientMode::Blacklist, false) => {
                GuardDecision::allow(&self.name)
            }
            (RecipientMode::Whitelist, false) => GuardDecision::block(
                &self.name,
                format!("recipient {} not in whitelist", ctx.recipient),
            ),
            (RecipientMode::Blacklist, true) => GuardDecision::block(
                &self.name,
                format!("recipient {} is blacklisted", ctx.recipient),
            ),
        };
        Ok(decision)
    }
}
