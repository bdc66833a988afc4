use {
    crate::{Address, TransactionHash},
    sqlx::{PgConnection, types::Json},
};

/// One victorious PvE completion per transaction. `party_luck` and
/// `scavenger_bonus_pct` are captured at the completion's block for the
/// drop-rate inference downstream.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Completion {
    pub tx_hash: TransactionHash,
    pub chain_id: i64,
    pub activity_type: String,
    pub activity_id: i64,
    pub player: Address,
    pub hero_ids: Json<Vec<i64>>,
    pub pet_ids: Json<Vec<i64>>,
    pub party_luck: Option<i64>,
    pub scavenger_bonus_pct: Option<f64>,
    pub block_number: i64,
}

pub async fn insert(ex: &mut PgConnection, completion: &Completion) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO pve_completions
    (tx_hash, chain_id, activity_type, activity_id, player,
     hero_ids, pet_ids, party_luck, scavenger_bonus_pct, block_number)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT DO NOTHING;
    "#;
    sqlx::query(QUERY)
        .bind(completion.tx_hash)
        .bind(completion.chain_id)
        .bind(&completion.activity_type)
        .bind(completion.activity_id)
        .bind(completion.player)
        .bind(&completion.hero_ids)
        .bind(&completion.pet_ids)
        .bind(completion.party_luck)
        .bind(completion.scavenger_bonus_pct)
        .bind(completion.block_number)
        .execute(ex)
        .await?;
    Ok(())
}

/// Completion count for one activity, optionally restricted to a scavenger
/// bonus tier (NULL scavenger treated as 0).
pub async fn count(
    ex: &mut PgConnection,
    chain_id: i64,
    activity_id: i64,
    scavenger_bonus_pct: Option<f64>,
) -> Result<i64, sqlx::Error> {
    const QUERY: &str = r#"
SELECT COUNT(*) FROM pve_completions
WHERE chain_id = $1
  AND activity_id = $2
  AND ($3::double precision IS NULL OR COALESCE(scavenger_bonus_pct, 0) = $3);
    "#;
    sqlx::query_scalar(QUERY)
        .bind(chain_id)
        .bind(activity_id)
        .bind(scavenger_bonus_pct)
        .fetch_one(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_completion_insert_and_count() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let completion = Completion {
            tx_hash: crate::byte_array::ByteArray([9; 32]),
            chain_id: 53935,
            activity_type: "hunt".to_string(),
            activity_id: 1,
            player: Default::default(),
            hero_ids: Json(vec![1000123, 1000456]),
            pet_ids: Json(vec![]),
            party_luck: Some(600),
            scavenger_bonus_pct: Some(15.0),
            block_number: 30_000_000,
        };
        insert(&mut db, &completion).await.unwrap();
        // replays are absorbed by the tx_hash key
        insert(&mut db, &completion).await.unwrap();

        assert_eq!(count(&mut db, 53935, 1, None).await.unwrap(), 1);
        assert_eq!(count(&mut db, 53935, 1, Some(15.0)).await.unwrap(), 1);
        assert_eq!(count(&mut db, 53935, 1, Some(25.0)).await.unwrap(), 0);
    }
}
