pub mod bargain_cache;
pub mod byte_array;
pub mod checkpoints;
pub mod gardening_rewards;
pub mod hero_snapshots;
pub mod pve_activities;
pub mod pve_completions;
pub mod pve_loot_items;
pub mod pve_rewards;
pub mod reward_events;
pub mod schema;
pub mod stakers;
pub mod swap_events;
pub mod tavern_heroes;
pub mod token_prices;
pub mod tournaments;

use {
    byte_array::ByteArray,
    sqlx::{Executor, PgPool},
};

// Design:
//
// Functions that execute multiple statements take `&mut PgTransaction` so the
// whole function succeeds or fails together. Functions that execute a single
// statement take `&mut PgConnection`. The parameter is called `ex` for
// `Executor`, the trait whose methods run the queries. `PgTransaction` derefs
// to `PgConnection` so callers choose whether a function participates in a
// bigger transaction or runs standalone; committing is the caller's job.
//
// For tests, start a transaction at the beginning of the test, run every
// query on it and never commit. The drop rolls it back, which lets postgres
// tests run in parallel without clearing tables.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// The names of all tables we use in the db.
pub const ALL_TABLES: &[&str] = &[
    "indexer_checkpoints",
    "stakers",
    "swap_events",
    "reward_events",
    "pve_activities",
    "pve_loot_items",
    "pve_completions",
    "pve_rewards",
    "gardening_quest_rewards",
    "tavern_heroes",
    "pvp_tournaments",
    "tournament_placements",
    "hero_tournament_snapshots",
    "bargain_hunter_cache",
    "token_price_graph",
];

/// Delete all data in the database. Only used by tests.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table};").as_str()).await?;
    }
    Ok(())
}

/// Like above but more ergonomic for some tests that use a pool.
#[allow(non_snake_case)]
pub async fn clear_DANGER(pool: &PgPool) -> sqlx::Result<()> {
    let mut transaction = pool.begin().await?;
    clear_DANGER_(&mut transaction).await?;
    transaction.commit().await
}

pub type Address = ByteArray<20>;
pub type TransactionHash = ByteArray<32>;

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_clear() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        schema::initialize(&mut con).await.unwrap();
        let mut con = con.begin().await.unwrap();
        clear_DANGER_(&mut con).await.unwrap();
    }
}
