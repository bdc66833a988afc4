use {
    chrono::{DateTime, Utc},
    sqlx::{PgConnection, types::Json},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, sqlx::Type)]
#[sqlx(type_name = "SummonType")]
#[sqlx(rename_all = "lowercase")]
pub enum SummonType {
    Regular,
    Dark,
}

impl SummonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Dark => "dark",
        }
    }
}

/// Pre-computed top-K bargain pairs, one row per summon type.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct CacheEntry {
    pub summon_type: SummonType,
    pub total_heroes: i64,
    pub total_pairs_scored: i64,
    pub crystal_price: f64,
    pub jewel_price: f64,
    pub top_pairs: Json<serde_json::Value>,
    pub computed_at: DateTime<Utc>,
}

pub async fn upsert(ex: &mut PgConnection, entry: &CacheEntry) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO bargain_hunter_cache
    (summon_type, total_heroes, total_pairs_scored, crystal_price, jewel_price, top_pairs, computed_at)
VALUES ($1, $2, $3, $4, $5, $6, now())
ON CONFLICT (summon_type) DO UPDATE SET
    total_heroes = EXCLUDED.total_heroes,
    total_pairs_scored = EXCLUDED.total_pairs_scored,
    crystal_price = EXCLUDED.crystal_price,
    jewel_price = EXCLUDED.jewel_price,
    top_pairs = EXCLUDED.top_pairs,
    computed_at = now();
    "#;
    sqlx::query(QUERY)
        .bind(entry.summon_type)
        .bind(entry.total_heroes)
        .bind(entry.total_pairs_scored)
        .bind(entry.crystal_price)
        .bind(entry.jewel_price)
        .bind(&entry.top_pairs)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch(
    ex: &mut PgConnection,
    summon_type: SummonType,
) -> Result<Option<CacheEntry>, sqlx::Error> {
    const QUERY: &str = "SELECT * FROM bargain_hunter_cache WHERE summon_type = $1;";
    sqlx::query_as(QUERY).bind(summon_type).fetch_optional(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_cache_refresh() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert!(fetch(&mut db, SummonType::Dark).await.unwrap().is_none());

        let mut entry = CacheEntry {
            summon_type: SummonType::Dark,
            total_heroes: 750,
            total_pairs_scored: 28_000,
            crystal_price: 0.2,
            jewel_price: 0.35,
            top_pairs: Json(serde_json::json!([{"heroId1": 1, "heroId2": 2}])),
            computed_at: Utc::now(),
        };
        upsert(&mut db, &entry).await.unwrap();

        // an empty refresh still replaces the cache
        entry.total_heroes = 0;
        entry.total_pairs_scored = 0;
        entry.top_pairs = Json(serde_json::json!([]));
        upsert(&mut db, &entry).await.unwrap();

        let row = fetch(&mut db, SummonType::Dark).await.unwrap().unwrap();
        assert_eq!(row.total_pairs_scored, 0);
        assert_eq!(row.top_pairs.0, serde_json::json!([]));
    }
}
