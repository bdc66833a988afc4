//! Concrete indexer families.
//!
//! The block-scanning families (LP staking, PvE, gardening, Harmony) all
//! share the scanner/worker/fleet machinery and differ only in their topic
//! set and how a matched log becomes rows; that seam is [`LogIndexer`].
//! The marketplace snapshot and tournament indexers pull from HTTP APIs and
//! bring their own worker pools.

pub mod gardening;
pub mod lp_staking;
pub mod marketplace;
pub mod pve;
pub mod tournaments;

use {
    alloy::{
        primitives::{Address, B256, U256},
        rpc::types::{Filter, Log},
    },
    anyhow::Result,
    bigdecimal::{BigDecimal, num_bigint::{BigInt, Sign}},
    std::collections::BTreeMap,
};

/// Events found in one batch, by kind.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventCounters(pub BTreeMap<String, u64>);

impl EventCounters {
    pub fn add(&mut self, kind: &str, count: u64) {
        if count > 0 {
            *self.0.entry(kind.to_string()).or_default() += count;
        }
    }

    pub fn increment(&mut self, kind: &str) {
        self.add(kind, 1);
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

/// One block-scanning indexer family, instantiated per scope (pool or
/// chain). Implementations decode matched logs and write their own rows;
/// scheduling, chunking, checkpointing and stealing are the machinery's
/// business.
#[async_trait::async_trait]
pub trait LogIndexer: Send + Sync {
    /// Family tag, first component of worker names, e.g. `unified`.
    fn indexer_type(&self) -> &'static str;

    /// Scope tag, second component of worker names, e.g. `pool_3`.
    fn scope(&self) -> String;

    fn chain_id(&self) -> u64;

    /// Blocks per worker batch.
    fn batch_size(&self) -> u64;

    /// First block worth scanning on this chain.
    fn genesis_block(&self) -> u64 {
        0
    }

    /// Address + topic-set filter for one `getLogs`, without block bounds.
    /// May fail on precondition errors (e.g. a pool without an LP token).
    async fn filter(&self) -> Result<Filter>;

    /// Decodes and stores all logs of one batch. Individual undecodable
    /// logs are skipped with a warning, not errors.
    async fn process_logs(&self, logs: Vec<Log>) -> Result<EventCounters>;
}

pub(crate) fn db_address(address: Address) -> database::Address {
    database::byte_array::ByteArray(address.into_array())
}

pub(crate) fn db_hash(hash: B256) -> database::TransactionHash {
    database::byte_array::ByteArray(hash.0)
}

pub(crate) fn big_decimal(value: U256) -> BigDecimal {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>()).into()
}

/// Log metadata the families rely on. Logs without it (pending blocks)
/// cannot be indexed.
pub(crate) fn log_meta(log: &Log) -> Option<(database::TransactionHash, i64, u64)> {
    let tx_hash = db_hash(log.transaction_hash?);
    let log_index = i64::try_from(log.log_index?).ok()?;
    let block_number = log.block_number?;
    Some((tx_hash, log_index, block_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_to_big_decimal() {
        assert_eq!(big_decimal(U256::ZERO), BigDecimal::from(0));
        assert_eq!(
            big_decimal(U256::from(10).pow(U256::from(19))),
            "10000000000000000000".parse().unwrap()
        );
        assert_eq!(big_decimal(U256::MAX).to_string().len(), 78);
    }

    #[test]
    fn counters_accumulate() {
        let mut counters = EventCounters::default();
        counters.add("deposit", 2);
        counters.increment("deposit");
        counters.add("swap", 0);
        assert_eq!(counters.total(), 3);
        assert!(!counters.0.contains_key("swap"));
    }
}
