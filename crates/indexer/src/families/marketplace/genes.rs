//! Gene backfill for marketplace heroes.
//!
//! The REST snapshot does not carry `statGenes`; a separate worker pool
//! pulls pending heroes and asks the GraphQL API, with a tighter backoff
//! than the usual retry wrapper because the endpoint rate-limits hard.

use {
    super::MarketplaceIndexer,
    crate::genes::decode_stat_genes,
    anyhow::{Context, Result, anyhow},
    rand::Rng,
    serde::Deserialize,
    std::{sync::Arc, time::Duration},
    tokio::sync::Semaphore,
};

/// Heroes claimed from the pending queue per round.
const CLAIM_BATCH: i64 = 200;
/// Retry budget per hero.
const MAX_RETRIES: u32 = 3;
pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<HeroData>,
}

#[derive(Debug, Deserialize)]
struct HeroData {
    hero: Option<HeroGenes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeroGenes {
    stat_genes: String,
}

#[derive(Debug, Default)]
pub struct BackfillSummary {
    pub completed: usize,
    pub failed: usize,
    pub rate_limit_hits: u64,
}

impl MarketplaceIndexer {
    /// Backfills genes for every pending hero. Concurrency is bounded by a
    /// semaphore of `gene_workers` permits.
    pub async fn run_gene_backfill(self: &Arc<Self>) -> Result<BackfillSummary> {
        let workers = self.config.gene_workers.clamp(1, MAX_WORKERS);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut summary = BackfillSummary::default();

        loop {
            if self.runtime.cancel.is_cancelled() {
                return Err(anyhow!("cancelled during gene backfill"));
            }
            let pending = {
                let mut ex = self.runtime.db.pool.acquire().await?;
                database::tavern_heroes::fetch_pending_genes(&mut ex, CLAIM_BATCH).await?
            };
            if pending.is_empty() {
                break;
            }

            let mut tasks = tokio::task::JoinSet::new();
            for hero_id in pending {
                let indexer = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let outcome = indexer.backfill_one(hero_id).await;
                    (hero_id, outcome)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                let (hero_id, outcome) = joined.context("gene backfill task panicked")?;
                match outcome {
                    Ok(rate_limit_hits) => {
                        summary.completed += 1;
                        summary.rate_limit_hits += rate_limit_hits;
                    }
                    Err(err) => {
                        tracing::warn!(hero_id, ?err, "gene backfill failed, marking hero");
                        summary.failed += 1;
                        let mut ex = self.runtime.db.pool.acquire().await?;
                        database::tavern_heroes::mark_genes_failed(&mut ex, hero_id).await?;
                    }
                }
            }
        }

        Metrics::get()
            .rate_limit_hits
            .inc_by(summary.rate_limit_hits);
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            rate_limit_hits = summary.rate_limit_hits,
            "gene backfill round done"
        );
        Ok(summary)
    }

    /// Fetches and stores one hero's genes. Returns how often the API
    /// rate-limited us on the way.
    async fn backfill_one(&self, hero_id: i64) -> Result<u64> {
        let (stat_genes, rate_limit_hits) = self.fetch_stat_genes(hero_id).await?;
        let genes = decode_stat_genes(&stat_genes)
            .with_context(|| format!("decode statGenes of hero {hero_id}"))?;
        let mut ex = self.runtime.db.pool.acquire().await?;
        database::tavern_heroes::store_genes(&mut ex, hero_id, &stat_genes, &genes).await?;
        Ok(rate_limit_hits)
    }

    /// GraphQL fetch with the backfill's own backoff:
    /// `min(1000 * 2^retry + jitter, 10000)` ms on 429/5xx, up to 3 retries.
    async fn fetch_stat_genes(&self, hero_id: i64) -> Result<(String, u64)> {
        let body = serde_json::json!({
            "query": "query($heroId: ID!) { hero(id: $heroId) { statGenes visualGenes } }",
            "variables": { "heroId": hero_id.to_string() },
        });
        let mut rate_limit_hits = 0u64;
        let mut retry = 0u32;
        loop {
            let response = self
                .http
                .post(self.config.graphql_url.clone())
                .json(&body)
                .send()
                .await;
            let should_retry = match &response {
                Ok(response) => {
                    let status = response.status();
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
                }
                Err(err) => err.is_connect() || err.is_timeout(),
            };
            if should_retry {
                rate_limit_hits += 1;
                if retry >= MAX_RETRIES {
                    return Err(anyhow!(
                        "genes api kept rate limiting hero {hero_id} after {MAX_RETRIES} retries"
                    ));
                }
                let jitter = rand::thread_rng().gen_range(0..250);
                let backoff = (1000u64 * 2u64.pow(retry) + jitter).min(10_000);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                retry += 1;
                continue;
            }

            let parsed: GraphqlResponse = response
                .context("genes request failed")?
                .json()
                .await
                .context("genes response is not json")?;
            let stat_genes = parsed
                .data
                .and_then(|data| data.hero)
                .map(|hero| hero.stat_genes)
                .ok_or_else(|| anyhow!("genes api knows no hero {hero_id}"))?;
            return Ok((stat_genes, rate_limit_hits));
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// 429/5xx responses from the genes API.
    #[metric(name = "indexer_gene_rate_limit_hits")]
    rate_limit_hits: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
