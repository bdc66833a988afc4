use {
    crate::{Address, TransactionHash},
    sqlx::{PgConnection, types::BigDecimal},
};

/// Append-only raw `Swap` events of a pool's LP pair, de-duplicated by
/// `(tx_hash, log_index)`.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SwapEvent {
    pub tx_hash: TransactionHash,
    pub log_index: i64,
    pub pid: i64,
    pub pair: Address,
    pub sender: Address,
    pub amount0_in: BigDecimal,
    pub amount1_in: BigDecimal,
    pub amount0_out: BigDecimal,
    pub amount1_out: BigDecimal,
    pub recipient: Address,
    pub block_number: i64,
}

pub async fn append(ex: &mut PgConnection, events: &[SwapEvent]) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO swap_events
    (tx_hash, log_index, pid, pair, sender,
     amount0_in, amount1_in, amount0_out, amount1_out, recipient, block_number)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT DO NOTHING;
    "#;
    for event in events {
        sqlx::query(QUERY)
            .bind(event.tx_hash)
            .bind(event.log_index)
            .bind(event.pid)
            .bind(event.pair)
            .bind(event.sender)
            .bind(&event.amount0_in)
            .bind(&event.amount1_in)
            .bind(&event.amount0_out)
            .bind(&event.amount1_out)
            .bind(event.recipient)
            .bind(event.block_number)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

pub async fn count_for_pool(ex: &mut PgConnection, pid: i64) -> Result<i64, sqlx::Error> {
    const QUERY: &str = "SELECT COUNT(*) FROM swap_events WHERE pid = $1;";
    sqlx::query_scalar(QUERY).bind(pid).fetch_one(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_swap_append_is_idempotent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let event = SwapEvent {
            tx_hash: crate::byte_array::ByteArray([1; 32]),
            log_index: 3,
            pid: 0,
            pair: Default::default(),
            sender: Default::default(),
            amount0_in: BigDecimal::from(1),
            amount1_in: BigDecimal::from(0),
            amount0_out: BigDecimal::from(0),
            amount1_out: BigDecimal::from(2),
            recipient: Default::default(),
            block_number: 1200,
        };
        append(&mut db, &[event.clone()]).await.unwrap();
        append(&mut db, &[event]).await.unwrap();
        assert_eq!(count_for_pool(&mut db, 0).await.unwrap(), 1);
    }
}
