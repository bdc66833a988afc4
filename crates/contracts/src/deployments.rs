//! Deployment addresses per network. Pools, contracts and activity types are
//! an enumerated constant set; this is not a general-purpose registry.

use alloy::primitives::{Address, address};

pub mod networks {
    pub const DFK_CHAIN: u64 = 53935;
    pub const METIS: u64 = 1088;
    pub const HARMONY: u64 = 1666600000;
}

/// Liquidity-pool ids within the staking contract.
pub const POOL_IDS: std::ops::RangeInclusive<u64> = 0..=13;

/// First block worth scanning on Harmony; the Serendale contracts were
/// deployed shortly after.
pub const HARMONY_GENESIS_BLOCK: u64 = 16_350_000;

pub struct StakingDeployment {
    pub chain_id: u64,
    pub master_gardener: Address,
    pub profiles: Address,
}

pub const DFK_STAKING: StakingDeployment = StakingDeployment {
    chain_id: networks::DFK_CHAIN,
    master_gardener: address!("0x57Dec9cC7f492d6583c773e2E7ad66dcDc6940Fb"),
    profiles: address!("0xC4cD8C09D1A90b21Be417be91A81603B03993E81"),
};

pub const HARMONY_STAKING: StakingDeployment = StakingDeployment {
    chain_id: networks::HARMONY,
    master_gardener: address!("0xDB30643c71aC9e2122cA0341eD77d09D5f99F924"),
    profiles: address!("0xabD4741948374b1f5DD5Dd7599AC1f85A34cAcDD"),
};

pub struct PveDeployment {
    pub chain_id: u64,
    /// HuntCore on DFK Chain, PatrolCore on Metis.
    pub activity_core: Address,
    pub hero_core: Address,
    pub pet_core: Address,
}

pub const DFK_HUNTS: PveDeployment = PveDeployment {
    chain_id: networks::DFK_CHAIN,
    activity_core: address!("0xE97196f4011dc9DA0829dd8E151EcFc0f37EE3c7"),
    hero_core: address!("0xEb9B61B145D6489Be575D3603F4a704810e143dF"),
    pet_core: address!("0x1990F87d6BC9D9385917E3EDa0A7674411C3Cd7F"),
};

pub const METIS_PATROLS: PveDeployment = PveDeployment {
    chain_id: networks::METIS,
    activity_core: address!("0x1Fc2f8c6e4DFdA9d0ab23b5d4daED97aaf41C6d3"),
    hero_core: address!("0x05DD6cF18a4a29E65f1E1594bEf1d2108F8C3Cdf"),
    pet_core: address!("0x624caf0B2ef0b60dB9AAa3baC2A2e1e5BEB65fCE"),
};

pub struct GardeningDeployment {
    pub chain_id: u64,
    pub quest_core: Address,
    pub reward_minter: Address,
}

pub const DFK_GARDENING: GardeningDeployment = GardeningDeployment {
    chain_id: networks::DFK_CHAIN,
    quest_core: address!("0xE9AbfBC143d7cef74b5B793ec5907fa62ca53154"),
    reward_minter: address!("0x594C6c2E91b8bcd11E2Ca2161a32B8d102773a7E"),
};

/// Summoning-stone contract addresses, looked up during marketplace
/// normalisation. The zero address means no stone was used.
pub const SUMMON_STONES: &[(Address, &str, &str)] = &[
    (address!("0x8F655142104478724bbC72664042EA09EBbF7B38"), "minor", "atonement"),
    (address!("0x1f3F655079b70190cb79cE5bc5AE5F19dAf2A6Cf"), "regular", "atonement"),
    (address!("0x17f3B5240C4A71a3BBF379710f6fA66B9b51f224"), "greater", "atonement"),
];
