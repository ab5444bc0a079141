//! HTTP-402 negotiated payments for agentpay.
//!
//! This crate implements the `402 Payment Required` flow as an
//! [`Adapter`](agentpay::route::Adapter) for the agentpay router:
//!
//! 1. Probe the recipient URL with an unauthenticated request
//! 2. Parse the payment descriptor from the 402 response (structured
//!    `X-Payment-Required` header, or body fields)
//! 3. Settle through the custody wallet (same network) or an injected
//!    cross-network settler
//! 4. Re-issue the original request with the payment proof header —
//!    legacy `X-Payment` (v1) or `Payment-Signature` (v2)
//! 5. Succeed iff the retried request succeeds
//!
//! Register it on the client:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use agentpay::PaymentClient;
//! # use agentpay_x402::X402Adapter;
//! # fn demo(custody: Arc<dyn agentpay::custody::CustodyProvider>) {
//! let client = PaymentClient::builder(Arc::clone(&custody))
//!     .adapter(Arc::new(X402Adapter::new(custody)))
//!     .build();
//! # }
//! ```

mod adapter;
mod headers;

pub use adapter::{CrossNetworkSettler, SettlementReceipt, X402Adapter};
pub use headers::{
    decode_descriptor_header, encode_proof, PaymentDescriptor, PaymentProof, X402Error,
    HEADER_PAYMENT_REQUIRED, HEADER_PAYMENT_RESPONSE, HEADER_PAYMENT_SIGNATURE, HEADER_X_PAYMENT,
};
