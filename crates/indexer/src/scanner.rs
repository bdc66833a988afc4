//! Chunked `getLogs` fetching for one worker batch.

use {
    crate::runtime::Cancellation,
    alloy::{
        providers::{DynProvider, Provider},
        rpc::types::{Filter, Log},
    },
    ethrpc::{RetryConfig, block_range::RangeInclusive, with_retry},
    std::time::Duration,
};

/// Blocks per `getLogs` sub-query.
pub const CHUNK: u64 = 2000;
/// Pause between sub-queries; doubles as backpressure on the RPC.
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub logs: Vec<Log>,
    /// Highest block the checkpoint may advance to: the end of the last
    /// chunk before the first failed (or cancelled) one. `None` if not even
    /// the first chunk went through.
    pub advance_to: Option<u64>,
    pub failed_chunks: u32,
}

/// Pulls all logs matching `filter` in `range`. A chunk that still fails
/// after retries is logged and skipped so one bad chunk does not poison the
/// batch; the returned `advance_to` stops short of it, which leaves the
/// failed blocks for the next pass.
pub async fn fetch_logs(
    provider: &DynProvider,
    filter: &Filter,
    range: RangeInclusive,
    cancel: &Cancellation,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let mut first_failure: Option<u64> = None;
    for chunk in range.chunks(CHUNK) {
        if cancel.is_cancelled() {
            break;
        }
        let chunk_filter = filter
            .clone()
            .from_block(chunk.start())
            .to_block(chunk.end());
        let result = with_retry("get_logs", RetryConfig::default(), || {
            provider.get_logs(&chunk_filter)
        })
        .await;
        match result {
            Ok(logs) => {
                outcome.logs.extend(logs);
                if first_failure.is_none() {
                    outcome.advance_to = Some(chunk.end());
                }
            }
            Err(err) => {
                tracing::warn!(
                    from = chunk.start(),
                    to = chunk.end(),
                    ?err,
                    "chunk failed after retries, leaving it unindexed for this pass"
                );
                outcome.failed_chunks += 1;
                first_failure.get_or_insert(chunk.start());
                Metrics::get().chunk_failures.inc();
            }
        }
        if cancel.sleep(INTER_CHUNK_DELAY).await {
            break;
        }
    }
    outcome
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Chunks that failed even after retries.
    #[metric(name = "indexer_chunk_failures")]
    chunk_failures: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
