//! Schema bootstrap.
//!
//! Proper migration tooling is deliberately out of scope; the service only
//! needs the tables to exist so a fresh database (and the `#[ignore]`d
//! postgres tests) can come up without an external migration step. Every
//! statement is idempotent.

use sqlx::{Executor, PgConnection};

const TYPES: &[&str] = &[
    r#"DO $$ BEGIN
    CREATE TYPE "IndexerStatus" AS ENUM ('idle', 'running', 'complete', 'error');
EXCEPTION WHEN duplicate_object THEN NULL; END $$;"#,
    r#"DO $$ BEGIN
    CREATE TYPE "ActivityKind" AS ENUM ('deposit', 'withdraw', 'emergencywithdraw');
EXCEPTION WHEN duplicate_object THEN NULL; END $$;"#,
    r#"DO $$ BEGIN
    CREATE TYPE "GenesStatus" AS ENUM ('pending', 'complete', 'failed');
EXCEPTION WHEN duplicate_object THEN NULL; END $$;"#,
    r#"DO $$ BEGIN
    CREATE TYPE "SummonType" AS ENUM ('regular', 'dark');
EXCEPTION WHEN duplicate_object THEN NULL; END $$;"#,
    r#"DO $$ BEGIN
    CREATE TYPE "RewardSource" AS ENUM ('manual_quest', 'expedition');
EXCEPTION WHEN duplicate_object THEN NULL; END $$;"#,
];

const TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS indexer_checkpoints (
    indexer_name text PRIMARY KEY,
    indexer_type text NOT NULL,
    scope text NOT NULL,
    lp_token bytea,
    range_start bigint NOT NULL,
    range_end bigint,
    last_indexed_block bigint NOT NULL,
    total_events_indexed bigint NOT NULL DEFAULT 0,
    status "IndexerStatus" NOT NULL DEFAULT 'idle',
    last_error text,
    updated_at timestamptz NOT NULL DEFAULT now()
);"#,
    r#"CREATE TABLE IF NOT EXISTS stakers (
    pid bigint NOT NULL,
    wallet bytea NOT NULL,
    staked_lp numeric(78, 0) NOT NULL,
    summoner_name text,
    last_activity_kind "ActivityKind" NOT NULL,
    last_activity_amount numeric(78, 0) NOT NULL,
    last_activity_block bigint NOT NULL,
    last_activity_tx bytea NOT NULL,
    last_updated_at timestamptz NOT NULL DEFAULT now(),
    PRIMARY KEY (pid, wallet)
);"#,
    r#"CREATE TABLE IF NOT EXISTS swap_events (
    tx_hash bytea NOT NULL,
    log_index bigint NOT NULL,
    pid bigint NOT NULL,
    pair bytea NOT NULL,
    sender bytea NOT NULL,
    amount0_in numeric(78, 0) NOT NULL,
    amount1_in numeric(78, 0) NOT NULL,
    amount0_out numeric(78, 0) NOT NULL,
    amount1_out numeric(78, 0) NOT NULL,
    recipient bytea NOT NULL,
    block_number bigint NOT NULL,
    PRIMARY KEY (tx_hash, log_index)
);"#,
    r#"CREATE TABLE IF NOT EXISTS reward_events (
    tx_hash bytea NOT NULL,
    log_index bigint NOT NULL,
    pid bigint NOT NULL,
    wallet bytea NOT NULL,
    amount numeric(78, 0) NOT NULL,
    block_number bigint NOT NULL,
    PRIMARY KEY (tx_hash, log_index)
);"#,
    r#"CREATE TABLE IF NOT EXISTS pve_activities (
    chain_id bigint NOT NULL,
    activity_type text NOT NULL,
    activity_id bigint NOT NULL,
    first_seen_block bigint NOT NULL,
    updated_at timestamptz NOT NULL DEFAULT now(),
    PRIMARY KEY (chain_id, activity_type, activity_id)
);"#,
    r#"CREATE TABLE IF NOT EXISTS pve_loot_items (
    chain_id bigint NOT NULL,
    item_address bytea NOT NULL,
    name text,
    item_type text,
    rarity text,
    PRIMARY KEY (chain_id, item_address)
);"#,
    r#"CREATE TABLE IF NOT EXISTS pve_completions (
    tx_hash bytea PRIMARY KEY,
    chain_id bigint NOT NULL,
    activity_type text NOT NULL,
    activity_id bigint NOT NULL,
    player bytea NOT NULL,
    hero_ids jsonb NOT NULL,
    pet_ids jsonb NOT NULL,
    party_luck bigint,
    scavenger_bonus_pct double precision,
    block_number bigint NOT NULL
);"#,
    r#"CREATE TABLE IF NOT EXISTS pve_rewards (
    tx_hash bytea NOT NULL,
    log_index bigint NOT NULL,
    chain_id bigint NOT NULL,
    activity_type text NOT NULL,
    activity_id bigint NOT NULL,
    player bytea NOT NULL,
    item_address bytea NOT NULL,
    amount numeric(78, 0) NOT NULL,
    is_equipment boolean NOT NULL DEFAULT false,
    party_luck bigint,
    scavenger_bonus_pct double precision,
    block_number bigint NOT NULL,
    PRIMARY KEY (tx_hash, log_index)
);"#,
    r#"CREATE TABLE IF NOT EXISTS gardening_quest_rewards (
    tx_hash bytea NOT NULL,
    log_index bigint NOT NULL,
    player bytea NOT NULL,
    quest_id bigint,
    quest_type int NOT NULL,
    item_address bytea NOT NULL,
    amount numeric(78, 0) NOT NULL,
    source "RewardSource" NOT NULL,
    block_number bigint NOT NULL,
    PRIMARY KEY (tx_hash, log_index)
);"#,
    r#"CREATE TABLE IF NOT EXISTS tavern_heroes (
    hero_id bigint PRIMARY KEY,
    realm text NOT NULL,
    main_class int NOT NULL,
    sub_class int NOT NULL,
    profession int NOT NULL,
    rarity int NOT NULL,
    level int NOT NULL,
    generation int NOT NULL,
    summons int NOT NULL,
    max_summons int NOT NULL,
    strength int NOT NULL,
    agility int NOT NULL,
    intelligence int NOT NULL,
    wisdom int NOT NULL,
    luck int NOT NULL,
    vitality int NOT NULL,
    endurance int NOT NULL,
    dexterity int NOT NULL,
    hp int NOT NULL,
    mp int NOT NULL,
    stamina int NOT NULL,
    active1 int NOT NULL,
    active2 int NOT NULL,
    passive1 int NOT NULL,
    passive2 int NOT NULL,
    stones_used int,
    trait_score int NOT NULL,
    combat_power int NOT NULL,
    sale_price_wei numeric(78, 0) NOT NULL,
    price_native double precision NOT NULL,
    native_token text NOT NULL,
    stat_genes text,
    class_d int, class_r1 int, class_r2 int, class_r3 int,
    sub_class_d int, sub_class_r1 int, sub_class_r2 int, sub_class_r3 int,
    profession_d int, profession_r1 int, profession_r2 int, profession_r3 int,
    passive1_d int, passive1_r1 int, passive1_r2 int, passive1_r3 int,
    passive2_d int, passive2_r1 int, passive2_r2 int, passive2_r3 int,
    active1_d int, active1_r1 int, active1_r2 int, active1_r3 int,
    active2_d int, active2_r1 int, active2_r2 int, active2_r3 int,
    stat_boost1_d int, stat_boost1_r1 int, stat_boost1_r2 int, stat_boost1_r3 int,
    stat_boost2_d int, stat_boost2_r1 int, stat_boost2_r2 int, stat_boost2_r3 int,
    stats_unknown1_d int, stats_unknown1_r1 int, stats_unknown1_r2 int, stats_unknown1_r3 int,
    element_d int, element_r1 int, element_r2 int, element_r3 int,
    stats_unknown2_d int, stats_unknown2_r1 int, stats_unknown2_r2 int, stats_unknown2_r3 int,
    genes_status "GenesStatus" NOT NULL DEFAULT 'pending',
    batch_id text NOT NULL,
    indexed_at timestamptz NOT NULL DEFAULT now()
);"#,
    r#"CREATE TABLE IF NOT EXISTS pvp_tournaments (
    tournament_id bigint PRIMARY KEY,
    format text NOT NULL,
    party_size int NOT NULL,
    restrictions jsonb NOT NULL,
    rewards jsonb,
    host_player bytea,
    opponent_player bytea,
    winner_player bytea,
    type_signature text NOT NULL
);"#,
    r#"CREATE TABLE IF NOT EXISTS tournament_placements (
    tournament_id bigint NOT NULL,
    player bytea NOT NULL,
    is_winner boolean NOT NULL,
    combat_power_score bigint NOT NULL,
    PRIMARY KEY (tournament_id, player)
);"#,
    r#"CREATE TABLE IF NOT EXISTS hero_tournament_snapshots (
    tournament_id bigint NOT NULL,
    hero_id bigint NOT NULL,
    player bytea NOT NULL,
    main_class int NOT NULL,
    sub_class int NOT NULL,
    level int NOT NULL,
    rarity int NOT NULL,
    generation int NOT NULL,
    strength int NOT NULL,
    agility int NOT NULL,
    intelligence int NOT NULL,
    wisdom int NOT NULL,
    luck int NOT NULL,
    vitality int NOT NULL,
    endurance int NOT NULL,
    dexterity int NOT NULL,
    active1 int NOT NULL,
    active2 int NOT NULL,
    passive1 int NOT NULL,
    passive2 int NOT NULL,
    stat_genes text,
    summons_remaining int,
    PRIMARY KEY (tournament_id, hero_id)
);"#,
    r#"CREATE TABLE IF NOT EXISTS bargain_hunter_cache (
    summon_type "SummonType" PRIMARY KEY,
    total_heroes bigint NOT NULL,
    total_pairs_scored bigint NOT NULL,
    crystal_price double precision NOT NULL,
    jewel_price double precision NOT NULL,
    top_pairs jsonb NOT NULL,
    computed_at timestamptz NOT NULL DEFAULT now()
);"#,
    r#"CREATE TABLE IF NOT EXISTS token_price_graph (
    token text PRIMARY KEY,
    price_usd double precision NOT NULL,
    updated_at timestamptz NOT NULL DEFAULT now()
);"#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS swap_events_pid ON swap_events (pid, block_number);",
    "CREATE INDEX IF NOT EXISTS reward_events_wallet ON reward_events (wallet);",
    "CREATE INDEX IF NOT EXISTS pve_rewards_activity ON pve_rewards (chain_id, activity_id, item_address);",
    "CREATE INDEX IF NOT EXISTS pve_completions_activity ON pve_completions (chain_id, activity_id);",
    "CREATE INDEX IF NOT EXISTS tavern_heroes_batch ON tavern_heroes (batch_id);",
    "CREATE INDEX IF NOT EXISTS tavern_heroes_genes_status ON tavern_heroes (genes_status);",
    "CREATE INDEX IF NOT EXISTS pvp_tournaments_signature ON pvp_tournaments (type_signature);",
];

pub async fn initialize(ex: &mut PgConnection) -> sqlx::Result<()> {
    for statement in TYPES.iter().chain(TABLES).chain(INDEXES) {
        ex.execute(*statement).await?;
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
    async fn postgres_schema_bootstrap_is_idempotent() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        initialize(&mut db).await.unwrap();
        initialize(&mut db).await.unwrap();
    }
}
