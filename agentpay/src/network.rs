//! Supported blockchain networks.
//!
//! The network set is a closed enumeration: wallets carry a network tag
//! assigned by the custody provider, and the cross-chain adapter only
//! supports pairs it has messaging-domain metadata for.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A supported blockchain network.
///
/// # Serialization
///
/// Serializes to/from the kebab-case network name (e.g. `"base-sepolia"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Ethereum mainnet.
    Ethereum,
    /// Ethereum Sepolia testnet.
    EthereumSepolia,
    /// Avalanche C-Chain.
    Avalanche,
    /// Avalanche Fuji testnet.
    AvalancheFuji,
    /// Optimism mainnet.
    Optimism,
    /// Optimism Sepolia testnet.
    OptimismSepolia,
    /// Arbitrum One.
    Arbitrum,
    /// Arbitrum Sepolia testnet.
    ArbitrumSepolia,
    /// Base mainnet.
    Base,
    /// Base Sepolia testnet.
    BaseSepolia,
    /// Polygon PoS.
    Polygon,
    /// Polygon Amoy testnet.
    PolygonAmoy,
    /// Solana mainnet-beta.
    Solana,
    /// Solana devnet.
    SolanaDevnet,
}

/// All supported networks, in declaration order.
pub const ALL_NETWORKS: &[Network] = &[
    Network::Ethereum,
    Network::EthereumSepolia,
    Network::Avalanche,
    Network::AvalancheFuji,
    Network::Optimism,
    Network::OptimismSepolia,
    Network::Arbitrum,
    Network::ArbitrumSepolia,
    Network::Base,
    Network::BaseSepolia,
    Network::Polygon,
    Network::PolygonAmoy,
    Network::Solana,
    Network::SolanaDevnet,
];

impl Network {
    /// Returns the canonical kebab-case name (e.g. `"base-sepolia"`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::EthereumSepolia => "ethereum-sepolia",
            Self::Avalanche => "avalanche",
            Self::AvalancheFuji => "avalanche-fuji",
            Self::Optimism => "optimism",
            Self::OptimismSepolia => "optimism-sepolia",
            Self::Arbitrum => "arbitrum",
            Self::ArbitrumSepolia => "arbitrum-sepolia",
            Self::Base => "base",
            Self::BaseSepolia => "base-sepolia",
            Self::Polygon => "polygon",
            Self::PolygonAmoy => "polygon-amoy",
            Self::Solana => "solana",
            Self::SolanaDevnet => "solana-devnet",
        }
    }

    /// Returns `true` for Solana-family networks.
    #[must_use]
    pub const fn is_solana(&self) -> bool {
        matches!(self, Self::Solana | Self::SolanaDevnet)
    }

    /// Returns `true` for EVM-family networks.
    #[must_use]
    pub const fn is_evm(&self) -> bool {
        !self.is_solana()
    }

    /// Returns `true` for test networks.
    #[must_use]
    pub const fn is_testnet(&self) -> bool {
        matches!(
            self,
            Self::EthereumSepolia
                | Self::AvalancheFuji
                | Self::OptimismSepolia
                | Self::ArbitrumSepolia
                | Self::BaseSepolia
                | Self::PolygonAmoy
                | Self::SolanaDevnet
        )
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown network name.
#[derive(Debug, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ALL_NETWORKS
            .iter()
            .find(|n| n.name() == normalized)
            .copied()
            .ok_or_else(|| UnknownNetworkError(s.to_owned()))
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}
