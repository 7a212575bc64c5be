//! Beldex network constants and address prefixes.
//!
//! Reference: beldex/src/cryptonote_config.h

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Types
// =============================================================================

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
        }
    }
}

/// Address type within a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Standard,
    Subaddress,
}

// =============================================================================
// Address Prefixes
// =============================================================================

/// Address prefix entry: the varint tag and what it identifies.
#[derive(Debug, Clone, Copy)]
pub struct PrefixInfo {
    pub prefix: u64,
    pub network: Network,
    pub address_type: AddressType,
}

pub static ALL_PREFIXES: [PrefixInfo; 6] = [
    PrefixInfo { prefix: 0xd1,   network: Network::Mainnet, address_type: AddressType::Standard },
    PrefixInfo { prefix: 0x3f36, network: Network::Mainnet, address_type: AddressType::Subaddress },
    PrefixInfo { prefix: 0x35,   network: Network::Testnet, address_type: AddressType::Standard },
    PrefixInfo { prefix: 0x3f,   network: Network::Testnet, address_type: AddressType::Subaddress },
    PrefixInfo { prefix: 0x18,   network: Network::Devnet,  address_type: AddressType::Standard },
    PrefixInfo { prefix: 0x24,   network: Network::Devnet,  address_type: AddressType::Subaddress },
];

/// Look up prefix info by varint tag.
pub fn prefix_info(prefix: u64) -> Option<&'static PrefixInfo> {
    ALL_PREFIXES.iter().find(|p| p.prefix == prefix)
}

/// Tag for a network/type combination.
pub fn get_prefix(network: Network, address_type: AddressType) -> u64 {
    ALL_PREFIXES
        .iter()
        .find(|p| p.network == network && p.address_type == address_type)
        .map(|p| p.prefix)
        .unwrap_or(ALL_PREFIXES[0].prefix)
}

// =============================================================================
// Sizes
// =============================================================================

pub const KEY_SIZE: usize = 32;

/// Address checksum length (first bytes of keccak256).
pub const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Amounts and fees
// =============================================================================

/// Atomic units per BDX.
pub const COIN: u64 = 1_000_000_000;

/// Per-byte fee component (atomic units).
pub const FEE_PER_BYTE: u64 = 215;

/// Per-output fee component (atomic units).
pub const FEE_PER_OUTPUT: u64 = 20_000;

// =============================================================================
// Transaction construction limits
// =============================================================================

/// Ring size required for RingCT inputs.
pub const DEFAULT_RING_SIZE: usize = 10;

/// Blocks an ordinary output must age before it can be spent.
pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;

/// Blocks a coinbase output must age before it can be spent.
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 30;

/// Below this value `unlock_time` is a block height, otherwise a timestamp.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Target seconds between blocks.
pub const DIFFICULTY_TARGET: u64 = 30;

/// Maximum inputs placed in one transaction before splitting.
pub const MAX_INPUTS_PER_TX: usize = 16;

/// Maximum recipient outputs in one transaction (the change output is extra).
pub const MAX_DESTINATIONS_PER_TX: usize = 15;

/// Marker unlock time for stake outputs: locked until an unlock request
/// is processed by the network.
pub const STAKE_LOCK_FOREVER: u64 = u64::MAX;

// =============================================================================
// Name service
// =============================================================================

/// Maximum name length in characters (excluding the `.bdx` suffix).
pub const BNS_MAX_NAME_LENGTH: usize = 63;

/// Burn required for a registration or renewal, indexed by mapping years.
pub fn bns_burn_amount(years: u8) -> u64 {
    match years {
        1 => 15 * COIN,
        2 => 25 * COIN,
        5 => 50 * COIN,
        10 => 80 * COIN,
        _ => 0,
    }
}
