//! Cross-chain payments for agentpay.
//!
//! Implements the burn/attest/mint flow of the cross-chain transfer
//! protocol (CCTP v2) as an [`Adapter`](agentpay::route::Adapter):
//!
//! 1. Approve the token messenger for the transfer amount
//! 2. `depositForBurn` on the source network
//! 3. Poll the attestation service until it signs the burn
//! 4. `receiveMessage` on the destination — via the relayer for fast
//!    transfers, or through an embedder-owned wallet on the destination
//!    network when no relayer applies
//!
//! Same-network requests short-circuit to a direct custody transfer. The
//! adapter also implements [`agentpay_x402::CrossNetworkSettler`], so the
//! HTTP-402 adapter can settle descriptors on foreign networks through it.

mod adapter;
mod constants;

pub use adapter::{BridgeAdapter, BridgeOptions};
pub use constants::{
    attestation_base, attestation_url, domain_id, is_supported, message_transmitter,
    token_messenger, usdc_contract, DEFAULT_MAX_FEE_SUBUNITS, FAST_FINALITY_THRESHOLD,
    STANDARD_FINALITY_THRESHOLD,
};
