use {
    crate::{Address, TransactionHash},
    sqlx::{PgConnection, types::BigDecimal},
};

/// Append-only reward-harvest events, de-duplicated by `(tx_hash, log_index)`.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RewardEvent {
    pub tx_hash: TransactionHash,
    pub log_index: i64,
    pub pid: i64,
    pub wallet: Address,
    pub amount: BigDecimal,
    pub block_number: i64,
}

pub async fn append(ex: &mut PgConnection, events: &[RewardEvent]) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO reward_events (tx_hash, log_index, pid, wallet, amount, block_number)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT DO NOTHING;
    "#;
    for event in events {
        sqlx::query(QUERY)
            .bind(event.tx_hash)
            .bind(event.log_index)
            .bind(event.pid)
            .bind(event.wallet)
            .bind(&event.amount)
            .bind(event.block_number)
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
    async fn postgres_reward_append_is_idempotent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let event = RewardEvent {
            tx_hash: crate::byte_array::ByteArray([7; 32]),
            log_index: 0,
            pid: 5,
            wallet: Default::default(),
            amount: BigDecimal::from(42),
            block_number: 100,
        };
        append(&mut db, &[event.clone(), event]).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reward_events;")
            .fetch_one(&mut *db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
