//! Payment execution core for autonomous agents.
//!
//! This crate lets software agents spend stablecoin funds held in custodial
//! wallets through a single entry point that enforces safety policy and
//! routes payments across dissimilar transport protocols. It provides:
//!
//! - [`client`] — The [`PaymentClient`](client::PaymentClient) orchestrator:
//!   `pay`, `simulate`, `batch_pay`, and the two-phase intent surface
//! - [`guard`] — Composable spending guards (budget, rate, single-tx,
//!   recipient, confirmation) with atomic reserve/commit/release
//! - [`route`] — The [`Adapter`](route::Adapter) contract and priority router
//! - [`storage`] — The key/value + atomic-counter + lock capability every
//!   stateful component persists through
//! - [`circuit`] / [`retry`] — Resilience against upstream outages
//! - [`ledger`] — Append-only audit log of every payment attempt
//! - [`custody`] — The capability boundary to the remote custody provider
//!
//! Transport adapters beyond the direct custody transfer live in sibling
//! crates: `agentpay-x402` (HTTP-402 negotiated payments) and
//! `agentpay-bridge` (cross-chain burn/attest/mint). A Redis-backed
//! [`storage::Storage`] implementation lives in `agentpay-redis`.

pub mod batch;
pub mod circuit;
pub mod client;
pub mod config;
pub mod custody;
pub mod error;
pub mod guard;
pub mod intent;
pub mod ledger;
pub mod lock;
pub mod network;
pub mod reservation;
pub mod retry;
pub mod route;
pub mod storage;
pub mod telemetry;
pub mod timestamp;
pub mod transfer;
pub mod trust;
pub mod types;

pub use client::{PaymentClient, PaymentClientBuilder};
pub use error::PaymentError;
pub use network::Network;
pub use types::{
    FeeLevel, PaymentMethod, PaymentRequest, PaymentResult, PaymentStatus, RecipientKind,
    ResilienceStrategy, SimulationResult, TrustCheck, WalletInfo,
};

/// Re-export of the decimal type used for every monetary amount.
pub use rust_decimal::Decimal;
