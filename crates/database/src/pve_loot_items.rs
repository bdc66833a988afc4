use {crate::Address, sqlx::PgConnection};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LootItem {
    pub chain_id: i64,
    pub item_address: Address,
    pub name: Option<String>,
    pub item_type: Option<String>,
    pub rarity: Option<String>,
}

/// Registers an item address the first time it is seen in a reward event.
/// Metadata stays NULL until backfilled from the known-address table.
pub async fn record(
    ex: &mut PgConnection,
    chain_id: i64,
    item_address: &Address,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO pve_loot_items (chain_id, item_address)
VALUES ($1, $2)
ON CONFLICT DO NOTHING;
    "#;
    sqlx::query(QUERY)
        .bind(chain_id)
        .bind(item_address)
        .execute(ex)
        .await?;
    Ok(())
}

/// Fills in metadata for a known address without clobbering existing values.
pub async fn backfill_metadata(
    ex: &mut PgConnection,
    chain_id: i64,
    item_address: &Address,
    name: &str,
    item_type: &str,
    rarity: &str,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE pve_loot_items
SET name = COALESCE(name, $3),
    item_type = COALESCE(item_type, $4),
    rarity = COALESCE(rarity, $5)
WHERE chain_id = $1 AND item_address = $2;
    "#;
    sqlx::query(QUERY)
        .bind(chain_id)
        .bind(item_address)
        .bind(name)
        .bind(item_type)
        .bind(rarity)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch_all(ex: &mut PgConnection, chain_id: i64) -> Result<Vec<LootItem>, sqlx::Error> {
    const QUERY: &str = "SELECT * FROM pve_loot_items WHERE chain_id = $1;";
    sqlx::query_as(QUERY).bind(chain_id).fetch_all(ex).await
}
