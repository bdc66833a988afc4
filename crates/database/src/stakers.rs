use {
    crate::{Address, TransactionHash},
    chrono::{DateTime, Utc},
    sqlx::{PgConnection, types::BigDecimal},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "ActivityKind")]
#[sqlx(rename_all = "lowercase")]
pub enum ActivityKind {
    #[default]
    Deposit,
    Withdraw,
    EmergencyWithdraw,
}

/// One row per `(pid, wallet)`. `staked_lp` is the live `userInfo.amount`
/// read from chain whenever the wallet is touched, never a balance
/// reconstructed from events.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Staker {
    pub pid: i64,
    pub wallet: Address,
    pub staked_lp: BigDecimal,
    pub summoner_name: Option<String>,
    pub last_activity_kind: ActivityKind,
    pub last_activity_amount: BigDecimal,
    pub last_activity_block: i64,
    pub last_activity_tx: TransactionHash,
    pub last_updated_at: DateTime<Utc>,
}

pub async fn upsert(ex: &mut PgConnection, staker: &Staker) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO stakers
    (pid, wallet, staked_lp, summoner_name, last_activity_kind,
     last_activity_amount, last_activity_block, last_activity_tx, last_updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
ON CONFLICT (pid, wallet) DO UPDATE SET
    staked_lp = EXCLUDED.staked_lp,
    summoner_name = COALESCE(EXCLUDED.summoner_name, stakers.summoner_name),
    last_activity_kind = EXCLUDED.last_activity_kind,
    last_activity_amount = EXCLUDED.last_activity_amount,
    last_activity_block = EXCLUDED.last_activity_block,
    last_activity_tx = EXCLUDED.last_activity_tx,
    last_updated_at = now();
    "#;
    sqlx::query(QUERY)
        .bind(staker.pid)
        .bind(staker.wallet)
        .bind(&staker.staked_lp)
        .bind(&staker.summoner_name)
        .bind(staker.last_activity_kind)
        .bind(&staker.last_activity_amount)
        .bind(staker.last_activity_block)
        .bind(staker.last_activity_tx)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch(
    ex: &mut PgConnection,
    pid: i64,
    wallet: &Address,
) -> Result<Option<Staker>, sqlx::Error> {
    const QUERY: &str = "SELECT * FROM stakers WHERE pid = $1 AND wallet = $2;";
    sqlx::query_as(QUERY)
        .bind(pid)
        .bind(wallet)
        .fetch_optional(ex)
        .await
}

pub async fn count_for_pool(ex: &mut PgConnection, pid: i64) -> Result<i64, sqlx::Error> {
    const QUERY: &str = "SELECT COUNT(*) FROM stakers WHERE pid = $1;";
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
    async fn postgres_staker_upsert_keeps_latest_activity() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let mut staker = Staker {
            pid: 0,
            wallet: crate::byte_array::ByteArray([0xaa; 20]),
            staked_lp: BigDecimal::from(10),
            summoner_name: Some("summoner".to_string()),
            last_activity_kind: ActivityKind::Deposit,
            last_activity_amount: BigDecimal::from(10),
            last_activity_block: 1500,
            last_activity_tx: Default::default(),
            last_updated_at: Utc::now(),
        };
        upsert(&mut db, &staker).await.unwrap();
        assert_eq!(count_for_pool(&mut db, 0).await.unwrap(), 1);

        // second touch replaces the live balance and activity, a missing
        // profile name does not erase a previously resolved one
        staker.staked_lp = BigDecimal::from(6);
        staker.summoner_name = None;
        staker.last_activity_kind = ActivityKind::Withdraw;
        staker.last_activity_block = 2500;
        upsert(&mut db, &staker).await.unwrap();

        let row = fetch(&mut db, 0, &staker.wallet).await.unwrap().unwrap();
        assert_eq!(row.staked_lp, BigDecimal::from(6));
        assert_eq!(row.summoner_name.as_deref(), Some("summoner"));
        assert_eq!(row.last_activity_kind, ActivityKind::Withdraw);
        assert_eq!(row.last_activity_block, 2500);
        assert_eq!(count_for_pool(&mut db, 0).await.unwrap(), 1);
    }
}
