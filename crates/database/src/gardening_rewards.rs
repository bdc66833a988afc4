use {
    crate::{Address, TransactionHash},
    sqlx::{PgConnection, types::BigDecimal},
};

/// How the gardening quest type of a reward was resolved: a `QuestCompleted`
/// in the same transaction, or an `ExpeditionIterationProcessed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "RewardSource")]
#[sqlx(rename_all = "snake_case")]
pub enum RewardSource {
    ManualQuest,
    Expedition,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct GardeningReward {
    pub tx_hash: TransactionHash,
    pub log_index: i64,
    pub player: Address,
    pub quest_id: Option<i64>,
    pub quest_type: i32,
    pub item_address: Address,
    pub amount: BigDecimal,
    pub source: RewardSource,
    pub block_number: i64,
}

pub async fn append(ex: &mut PgConnection, rewards: &[GardeningReward]) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO gardening_quest_rewards
    (tx_hash, log_index, player, quest_id, quest_type, item_address, amount, source, block_number)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT DO NOTHING;
    "#;
    for reward in rewards {
        sqlx::query(QUERY)
            .bind(reward.tx_hash)
            .bind(reward.log_index)
            .bind(reward.player)
            .bind(reward.quest_id)
            .bind(reward.quest_type)
            .bind(reward.item_address)
            .bind(&reward.amount)
            .bind(reward.source)
            .bind(reward.block_number)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_gardening_append_is_idempotent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let reward = GardeningReward {
            tx_hash: crate::byte_array::ByteArray([5; 32]),
            log_index: 2,
            player: Default::default(),
            quest_id: Some(77),
            quest_type: 3,
            item_address: Default::default(),
            amount: BigDecimal::from(1),
            source: RewardSource::ManualQuest,
            block_number: 500,
        };
        append(&mut db, &[reward.clone(), reward]).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gardening_quest_rewards;")
            .fetch_one(&mut *db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
