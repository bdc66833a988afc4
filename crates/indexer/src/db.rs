use {
    anyhow::{Context, Result},
    database::checkpoints::{Checkpoint, IndexerStatus},
    sqlx::PgPool,
};

/// Handle to the relational store shared by every indexer.
#[derive(Clone)]
pub struct Postgres {
    pub pool: PgPool,
}

impl Postgres {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await.context("connect postgres")?;
        Ok(Self { pool })
    }

    pub async fn initialize_schema(&self) -> Result<()> {
        let mut ex = self.pool.acquire().await?;
        database::schema::initialize(&mut ex)
            .await
            .context("initialize schema")?;
        Ok(())
    }

    pub async fn checkpoint(&self, name: &str) -> Result<Option<Checkpoint>> {
        let _timer = Metrics::get()
            .database_queries
            .with_label_values(&["checkpoint_fetch"])
            .start_timer();
        let mut ex = self.pool.acquire().await?;
        database::checkpoints::fetch(&mut ex, name)
            .await
            .context("fetch checkpoint")
    }

    pub async fn initialize_checkpoint(
        &self,
        name: &str,
        indexer_type: &str,
        scope: &str,
        range_start: u64,
        range_end: Option<u64>,
    ) -> Result<Checkpoint> {
        let mut ex = self.pool.acquire().await?;
        database::checkpoints::initialize(
            &mut ex,
            name,
            indexer_type,
            scope,
            to_i64(range_start)?,
            range_end.map(to_i64).transpose()?,
        )
        .await
        .context("initialize checkpoint")
    }

    pub async fn checkpoint_status(
        &self,
        name: &str,
        status: IndexerStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut ex = self.pool.acquire().await?;
        database::checkpoints::set_status(&mut ex, name, status, last_error)
            .await
            .context("set checkpoint status")
    }

    pub async fn delete_checkpoints(&self, indexer_type: &str, scope: &str) -> Result<u64> {
        let mut ex = self.pool.acquire().await?;
        database::checkpoints::delete_fleet(&mut ex, indexer_type, scope)
            .await
            .context("delete checkpoints")
    }
}

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).context("block number exceeds i64")
}

pub fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).context("negative block number")
}

#[derive(prometheus_metric_storage::MetricStorage)]
pub struct Metrics {
    /// Timing of db queries.
    #[metric(name = "indexer_database_queries", labels("type"))]
    pub database_queries: prometheus::HistogramVec,
}

impl Metrics {
    pub fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
