use {
    crate::Address,
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
};

/// Lifecycle of a single worker's checkpoint row.
///
/// `idle -> running -> (idle | complete | error)`. A successful batch leaves
/// the row `idle`, or `complete` once `last_indexed_block` reached
/// `range_end`. A failed batch leaves `error` with `last_error` set; the next
/// tick retries the same range.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "IndexerStatus")]
#[sqlx(rename_all = "lowercase")]
pub enum IndexerStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Error,
}

/// Persistent progress of one worker. `range_end = NULL` means the worker
/// tracks the chain head indefinitely.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Checkpoint {
    pub indexer_name: String,
    pub indexer_type: String,
    pub scope: String,
    pub lp_token: Option<Address>,
    pub range_start: i64,
    pub range_end: Option<i64>,
    pub last_indexed_block: i64,
    pub total_events_indexed: i64,
    pub status: IndexerStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn fetch(ex: &mut PgConnection, name: &str) -> Result<Option<Checkpoint>, sqlx::Error> {
    const QUERY: &str = "SELECT * FROM indexer_checkpoints WHERE indexer_name = $1;";
    sqlx::query_as(QUERY).bind(name).fetch_optional(ex).await
}

/// Inserts the row iff it does not exist yet and returns the current state
/// either way. A fresh row starts at `last_indexed_block = range_start`.
pub async fn initialize(
    ex: &mut PgConnection,
    name: &str,
    indexer_type: &str,
    scope: &str,
    range_start: i64,
    range_end: Option<i64>,
) -> Result<Checkpoint, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO indexer_checkpoints
    (indexer_name, indexer_type, scope, range_start, range_end, last_indexed_block)
VALUES ($1, $2, $3, $4, $5, $4)
ON CONFLICT (indexer_name) DO NOTHING;
    "#;
    sqlx::query(QUERY)
        .bind(name)
        .bind(indexer_type)
        .bind(scope)
        .bind(range_start)
        .bind(range_end)
        .execute(&mut *ex)
        .await?;
    fetch(ex, name).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn set_status(
    ex: &mut PgConnection,
    name: &str,
    status: IndexerStatus,
    last_error: Option<&str>,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE indexer_checkpoints
SET status = $2, last_error = $3, updated_at = now()
WHERE indexer_name = $1;
    "#;
    sqlx::query(QUERY)
        .bind(name)
        .bind(status)
        .bind(last_error)
        .execute(ex)
        .await?;
    Ok(())
}

/// Commits a finished batch: advances the cursor, accumulates the event
/// counter and settles the status in one statement.
#[tracing::instrument(skip_all, fields(name))]
pub async fn advance(
    ex: &mut PgConnection,
    name: &str,
    last_indexed_block: i64,
    events_delta: i64,
    status: IndexerStatus,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE indexer_checkpoints
SET last_indexed_block = $2,
    total_events_indexed = total_events_indexed + $3,
    status = $4,
    last_error = NULL,
    updated_at = now()
WHERE indexer_name = $1;
    "#;
    sqlx::query(QUERY)
        .bind(name)
        .bind(last_indexed_block)
        .bind(events_delta)
        .bind(status)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn set_lp_token(
    ex: &mut PgConnection,
    name: &str,
    lp_token: Address,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE indexer_checkpoints SET lp_token = $2, updated_at = now() WHERE indexer_name = $1;
    "#;
    sqlx::query(QUERY)
        .bind(name)
        .bind(lp_token)
        .execute(ex)
        .await?;
    Ok(())
}

/// Shrinks a donor's range during a steal. Refuses to cut below what the
/// donor has already indexed.
pub async fn shrink_range_end(
    ex: &mut PgConnection,
    name: &str,
    new_range_end: i64,
) -> Result<bool, sqlx::Error> {
    const QUERY: &str = r#"
UPDATE indexer_checkpoints
SET range_end = $2, updated_at = now()
WHERE indexer_name = $1 AND last_indexed_block <= $2;
    "#;
    let result = sqlx::query(QUERY)
        .bind(name)
        .bind(new_range_end)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Reassigns a thief's range after a steal. The cursor restarts at the new
/// range start.
pub async fn reassign_range(
    ex: &mut PgConnection,
    name: &str,
    range_start: i64,
    range_end: Option<i64>,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE indexer_checkpoints
SET range_start = $2,
    range_end = $3,
    last_indexed_block = $2,
    status = 'idle',
    last_error = NULL,
    updated_at = now()
WHERE indexer_name = $1;
    "#;
    sqlx::query(QUERY)
        .bind(name)
        .bind(range_start)
        .bind(range_end)
        .execute(ex)
        .await?;
    Ok(())
}

/// All checkpoints of one fleet, ordered by worker name. Used for status
/// aggregation and by the work-steal arbiter to inspect siblings.
pub async fn fetch_fleet(
    ex: &mut PgConnection,
    indexer_type: &str,
    scope: &str,
) -> Result<Vec<Checkpoint>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT * FROM indexer_checkpoints
WHERE indexer_type = $1 AND scope = $2
ORDER BY indexer_name;
    "#;
    sqlx::query_as(QUERY)
        .bind(indexer_type)
        .bind(scope)
        .fetch_all(ex)
        .await
}

/// The only legal "reset" operation. The next launch re-initializes the row.
pub async fn delete(ex: &mut PgConnection, name: &str) -> Result<(), sqlx::Error> {
    const QUERY: &str = "DELETE FROM indexer_checkpoints WHERE indexer_name = $1;";
    sqlx::query(QUERY).bind(name).execute(ex).await?;
    Ok(())
}

pub async fn delete_fleet(
    ex: &mut PgConnection,
    indexer_type: &str,
    scope: &str,
) -> Result<u64, sqlx::Error> {
    const QUERY: &str =
        "DELETE FROM indexer_checkpoints WHERE indexer_type = $1 AND scope = $2;";
    let result = sqlx::query(QUERY)
        .bind(indexer_type)
        .bind(scope)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_checkpoint_roundtrip() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert!(fetch(&mut db, "unified_pool_3_w2").await.unwrap().is_none());

        let row = initialize(&mut db, "unified_pool_3_w2", "unified", "pool_3", 100, Some(5000))
            .await
            .unwrap();
        assert_eq!(row.last_indexed_block, 100);
        assert_eq!(row.status, IndexerStatus::Idle);

        // initialize is idempotent and does not clobber progress
        advance(&mut db, "unified_pool_3_w2", 2000, 7, IndexerStatus::Idle)
            .await
            .unwrap();
        let row = initialize(&mut db, "unified_pool_3_w2", "unified", "pool_3", 100, Some(5000))
            .await
            .unwrap();
        assert_eq!(row.last_indexed_block, 2000);
        assert_eq!(row.total_events_indexed, 7);

        set_status(&mut db, "unified_pool_3_w2", IndexerStatus::Error, Some("boom"))
            .await
            .unwrap();
        let row = fetch(&mut db, "unified_pool_3_w2").await.unwrap().unwrap();
        assert_eq!(row.status, IndexerStatus::Error);
        assert_eq!(row.last_error.as_deref(), Some("boom"));

        // a successful advance clears the error
        advance(&mut db, "unified_pool_3_w2", 5000, 0, IndexerStatus::Complete)
            .await
            .unwrap();
        let row = fetch(&mut db, "unified_pool_3_w2").await.unwrap().unwrap();
        assert_eq!(row.status, IndexerStatus::Complete);
        assert_eq!(row.last_error, None);

        delete(&mut db, "unified_pool_3_w2").await.unwrap();
        assert!(fetch(&mut db, "unified_pool_3_w2").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_steal_range_updates() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        initialize(&mut db, "pve_dfk_w0", "pve", "dfk", 0, Some(50_000_000))
            .await
            .unwrap();
        advance(&mut db, "pve_dfk_w0", 15_000_000, 0, IndexerStatus::Idle)
            .await
            .unwrap();

        // cutting below the cursor is refused
        assert!(!shrink_range_end(&mut db, "pve_dfk_w0", 14_000_000).await.unwrap());
        assert!(shrink_range_end(&mut db, "pve_dfk_w0", 32_500_000).await.unwrap());

        initialize(&mut db, "pve_dfk_w1", "pve", "dfk", 0, Some(10_000_000))
            .await
            .unwrap();
        reassign_range(&mut db, "pve_dfk_w1", 32_500_001, Some(50_000_000))
            .await
            .unwrap();
        let row = fetch(&mut db, "pve_dfk_w1").await.unwrap().unwrap();
        assert_eq!(row.range_start, 32_500_001);
        assert_eq!(row.range_end, Some(50_000_000));
        assert_eq!(row.last_indexed_block, 32_500_001);

        let fleet = fetch_fleet(&mut db, "pve", "dfk").await.unwrap();
        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet[0].indexer_name, "pve_dfk_w0");
    }
}
