use {crate::Address, sqlx::PgConnection};

/// Full hero state frozen at the battle moment, linked to a placement.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct HeroSnapshot {
    pub tournament_id: i64,
    pub hero_id: i64,
    pub player: Address,
    pub main_class: i32,
    pub sub_class: i32,
    pub level: i32,
    pub rarity: i32,
    pub generation: i32,
    pub strength: i32,
    pub agility: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub luck: i32,
    pub vitality: i32,
    pub endurance: i32,
    pub dexterity: i32,
    pub active1: i32,
    pub active2: i32,
    pub passive1: i32,
    pub passive2: i32,
    pub stat_genes: Option<String>,
    pub summons_remaining: Option<i32>,
}

pub async fn append(ex: &mut PgConnection, snapshots: &[HeroSnapshot]) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO hero_tournament_snapshots
    (tournament_id, hero_id, player, main_class, sub_class, level, rarity, generation,
     strength, agility, intelligence, wisdom, luck, vitality, endurance, dexterity,
     active1, active2, passive1, passive2, stat_genes, summons_remaining)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
        $17, $18, $19, $20, $21, $22)
ON CONFLICT DO NOTHING;
    "#;
    for snapshot in snapshots {
        sqlx::query(QUERY)
            .bind(snapshot.tournament_id)
            .bind(snapshot.hero_id)
            .bind(snapshot.player)
            .bind(snapshot.main_class)
            .bind(snapshot.sub_class)
            .bind(snapshot.level)
            .bind(snapshot.rarity)
            .bind(snapshot.generation)
            .bind(snapshot.strength)
            .bind(snapshot.agility)
            .bind(snapshot.intelligence)
            .bind(snapshot.wisdom)
            .bind(snapshot.luck)
            .bind(snapshot.vitality)
            .bind(snapshot.endurance)
            .bind(snapshot.dexterity)
            .bind(snapshot.active1)
            .bind(snapshot.active2)
            .bind(snapshot.passive1)
            .bind(snapshot.passive2)
            .bind(&snapshot.stat_genes)
            .bind(snapshot.summons_remaining)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}
