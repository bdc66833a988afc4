use sqlx::PgConnection;

/// Registry of PvE activities seen on a chain, keyed by
/// `(chain_id, activity_type, activity_id)`.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Activity {
    pub chain_id: i64,
    pub activity_type: String,
    pub activity_id: i64,
    pub first_seen_block: i64,
}

pub async fn record(ex: &mut PgConnection, activity: &Activity) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO pve_activities (chain_id, activity_type, activity_id, first_seen_block)
VALUES ($1, $2, $3, $4)
ON CONFLICT (chain_id, activity_type, activity_id) DO UPDATE SET updated_at = now();
    "#;
    sqlx::query(QUERY)
        .bind(activity.chain_id)
        .bind(&activity.activity_type)
        .bind(activity.activity_id)
        .bind(activity.first_seen_block)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch_all(ex: &mut PgConnection, chain_id: i64) -> Result<Vec<Activity>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT chain_id, activity_type, activity_id, first_seen_block
FROM pve_activities WHERE chain_id = $1 ORDER BY activity_id;
    "#;
    sqlx::query_as(QUERY).bind(chain_id).fetch_all(ex).await
}
