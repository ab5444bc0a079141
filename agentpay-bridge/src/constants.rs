//! Cross-chain transfer protocol (CCTP v2) metadata.
//!
//! Domain identifiers, contract addresses, and the attestation API, per the
//! protocol operator's published references.

use agentpay::Network;

/// TokenMessengerV2 on every supported mainnet.
const TOKEN_MESSENGER_MAINNET: &str = "0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d";
/// TokenMessengerV2 on every supported testnet.
const TOKEN_MESSENGER_TESTNET: &str = "0x8FE6B999Dc680CcFDD5Bf7EB0974218be2542DAA";

/// MessageTransmitterV2 on every supported mainnet.
const MESSAGE_TRANSMITTER_MAINNET: &str = "0x81D40F21F12A8F0E3252Bccb954D722d4c464B64";
/// MessageTransmitterV2 on every supported testnet.
const MESSAGE_TRANSMITTER_TESTNET: &str = "0xE737e5cEBEEBa77EFE34D4aa090756590b1CE275";

/// Attestation API base for test networks.
const ATTESTATION_API_SANDBOX: &str = "https://iris-api-sandbox.circle.com";
/// Attestation API base for main networks.
const ATTESTATION_API_MAINNET: &str = "https://iris-api.circle.com";

/// Finality threshold selecting the fast transfer mode (seconds-scale).
pub const FAST_FINALITY_THRESHOLD: u32 = 1000;
/// Finality threshold selecting the standard transfer mode (minutes-scale).
pub const STANDARD_FINALITY_THRESHOLD: u32 = 2000;
/// Default relayer fee cap in stablecoin subunits (0.0005 tokens).
pub const DEFAULT_MAX_FEE_SUBUNITS: u64 = 500;
/// `destinationCaller` value meaning "anyone may deliver".
pub const EMPTY_DESTINATION_CALLER: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Messaging domain id for a network, when the protocol covers it.
#[must_use]
pub const fn domain_id(network: Network) -> Option<u32> {
    match network {
        Network::Ethereum | Network::EthereumSepolia => Some(0),
        Network::Avalanche | Network::AvalancheFuji => Some(1),
        Network::Optimism | Network::OptimismSepolia => Some(2),
        Network::Arbitrum | Network::ArbitrumSepolia => Some(3),
        Network::Solana | Network::SolanaDevnet => Some(5),
        Network::Base | Network::BaseSepolia => Some(6),
        Network::Polygon | Network::PolygonAmoy => Some(7),
    }
}

/// Whether the cross-chain protocol supports a network.
#[must_use]
pub const fn is_supported(network: Network) -> bool {
    domain_id(network).is_some()
}

/// TokenMessengerV2 address for an EVM network.
#[must_use]
pub const fn token_messenger(network: Network) -> Option<&'static str> {
    if network.is_solana() {
        return None;
    }
    Some(if network.is_testnet() {
        TOKEN_MESSENGER_TESTNET
    } else {
        TOKEN_MESSENGER_MAINNET
    })
}

/// MessageTransmitterV2 address for an EVM network.
#[must_use]
pub const fn message_transmitter(network: Network) -> Option<&'static str> {
    if network.is_solana() {
        return None;
    }
    Some(if network.is_testnet() {
        MESSAGE_TRANSMITTER_TESTNET
    } else {
        MESSAGE_TRANSMITTER_MAINNET
    })
}

/// USDC token contract for a network.
#[must_use]
pub const fn usdc_contract(network: Network) -> Option<&'static str> {
    match network {
        Network::Ethereum => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        Network::EthereumSepolia => Some("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        Network::Avalanche => Some("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        Network::AvalancheFuji => Some("0x5425890298aed601595a70AB815c96711a31Bc65"),
        Network::Optimism => Some("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        Network::OptimismSepolia => Some("0x5fd84259d66Cd46123540766Be93DFE6D43130D7"),
        Network::Arbitrum => Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        Network::ArbitrumSepolia => Some("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
        Network::Base => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        Network::BaseSepolia => Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        Network::Polygon => Some("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        Network::PolygonAmoy => Some("0x41e94eb019c0762f9bfcf9fb1e58725bfb0e7582"),
        Network::Solana | Network::SolanaDevnet => None,
    }
}

/// Attestation API base URL for a network.
#[must_use]
pub const fn attestation_base(network: Network) -> &'static str {
    if network.is_testnet() {
        ATTESTATION_API_SANDBOX
    } else {
        ATTESTATION_API_MAINNET
    }
}

/// Attestation lookup URL for a burn transaction.
#[must_use]
pub fn attestation_url(base: &str, source_domain: u32, burn_tx_hash: &str) -> String {
    format!("{base}/v2/messages/{source_domain}?transactionHash={burn_tx_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_cover_all_networks() {
        for network in agentpay::network::ALL_NETWORKS {
            assert!(is_supported(*network), "{network} should carry a domain id");
        }
    }

    #[test]
    fn test_domain_pairs_match_per_family() {
        assert_eq!(domain_id(Network::Base), domain_id(Network::BaseSepolia));
        assert_eq!(domain_id(Network::Base), Some(6));
        assert_eq!(domain_id(Network::Ethereum), Some(0));
        assert_eq!(domain_id(Network::Solana), Some(5));
    }

    #[test]
    fn test_evm_contracts_present_solana_absent() {
        assert!(token_messenger(Network::BaseSepolia).is_some());
        assert!(message_transmitter(Network::BaseSepolia).is_some());
        assert!(usdc_contract(Network::BaseSepolia).is_some());
        assert!(token_messenger(Network::Solana).is_none());
        assert!(usdc_contract(Network::Solana).is_none());
    }

    #[test]
    fn test_attestation_url_shape() {
        let url = attestation_url(attestation_base(Network::BaseSepolia), 6, "0xburn");
        assert_eq!(
            url,
            "https://iris-api-sandbox.circle.com/v2/messages/6?transactionHash=0xburn"
        );
    }
}
