use {
    crate::{Address, TransactionHash},
    sqlx::{PgConnection, types::BigDecimal},
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Reward {
    pub tx_hash: TransactionHash,
    pub log_index: i64,
    pub chain_id: i64,
    pub activity_type: String,
    pub activity_id: i64,
    pub player: Address,
    pub item_address: Address,
    pub amount: BigDecimal,
    pub is_equipment: bool,
    pub party_luck: Option<i64>,
    pub scavenger_bonus_pct: Option<f64>,
    pub block_number: i64,
}

pub async fn append(ex: &mut PgConnection, rewards: &[Reward]) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO pve_rewards
    (tx_hash, log_index, chain_id, activity_type, activity_id, player,
     item_address, amount, is_equipment, party_luck, scavenger_bonus_pct, block_number)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
ON CONFLICT DO NOTHING;
    "#;
    for reward in rewards {
        sqlx::query(QUERY)
            .bind(reward.tx_hash)
            .bind(reward.log_index)
            .bind(reward.chain_id)
            .bind(&reward.activity_type)
            .bind(reward.activity_id)
            .bind(reward.player)
            .bind(reward.item_address)
            .bind(&reward.amount)
            .bind(reward.is_equipment)
            .bind(reward.party_luck)
            .bind(reward.scavenger_bonus_pct)
            .bind(reward.block_number)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

/// Aggregates the drop observations the inference engine works on.
#[derive(Clone, Copy, Debug, Default, sqlx::FromRow)]
pub struct DropAggregates {
    pub drops: i64,
    pub avg_party_luck: Option<f64>,
    pub avg_scavenger_bonus_pct: Option<f64>,
}

pub async fn drop_aggregates(
    ex: &mut PgConnection,
    chain_id: i64,
    activity_id: i64,
    item_address: &Address,
    scavenger_bonus_pct: Option<f64>,
) -> Result<DropAggregates, sqlx::Error> {
    const QUERY: &str = r#"
SELECT
    COUNT(*) AS drops,
    AVG(party_luck::double precision) AS avg_party_luck,
    AVG(COALESCE(scavenger_bonus_pct, 0)) AS avg_scavenger_bonus_pct
FROM pve_rewards
WHERE chain_id = $1
  AND activity_id = $2
  AND item_address = $3
  AND ($4::double precision IS NULL OR COALESCE(scavenger_bonus_pct, 0) = $4);
    "#;
    sqlx::query_as(QUERY)
        .bind(chain_id)
        .bind(activity_id)
        .bind(item_address)
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
    async fn postgres_reward_aggregates() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let item = crate::byte_array::ByteArray([3; 20]);
        let rewards: Vec<_> = (0..4u8)
            .map(|i| Reward {
                tx_hash: crate::byte_array::ByteArray([i; 32]),
                log_index: 0,
                chain_id: 53935,
                activity_type: "hunt".to_string(),
                activity_id: 1,
                player: Default::default(),
                item_address: item,
                amount: BigDecimal::from(1),
                is_equipment: false,
                party_luck: Some(500 + i64::from(i) * 100),
                scavenger_bonus_pct: if i % 2 == 0 { Some(10.0) } else { None },
                block_number: 100,
            })
            .collect();
        append(&mut db, &rewards).await.unwrap();
        // replay changes nothing
        append(&mut db, &rewards).await.unwrap();

        let aggregates = drop_aggregates(&mut db, 53935, 1, &item, None).await.unwrap();
        assert_eq!(aggregates.drops, 4);
        assert_eq!(aggregates.avg_party_luck, Some(650.0));
        assert_eq!(aggregates.avg_scavenger_bonus_pct, Some(5.0));

        let tiered = drop_aggregates(&mut db, 53935, 1, &item, Some(10.0)).await.unwrap();
        assert_eq!(tiered.drops, 2);
    }
}
