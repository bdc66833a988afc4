use {
    sqlx::{
        PgConnection, Row,
        postgres::PgRow,
        types::BigDecimal,
    },
    std::fmt,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "GenesStatus")]
#[sqlx(rename_all = "lowercase")]
pub enum GenesStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

/// Marketplace shard a hero is listed on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Realm {
    /// Crystalvale (DFK Chain)
    Cv,
    /// Sundered Isles (Metis)
    Sd,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cv => "cv",
            Self::Sd => "sd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cv" => Some(Self::Cv),
            "sd" => Some(Self::Sd),
            _ => None,
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The 12 stat-gene slots in kai-string order. The column prefixes double as
/// the canonical slot names throughout the crate.
pub const GENE_SLOTS: [&str; 12] = [
    "class",
    "sub_class",
    "profession",
    "passive1",
    "passive2",
    "active1",
    "active2",
    "stat_boost1",
    "stat_boost2",
    "stats_unknown1",
    "element",
    "stats_unknown2",
];

/// Dominant + three recessives of one gene slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GeneSlot {
    pub d: i32,
    pub r1: i32,
    pub r2: i32,
    pub r3: i32,
}

/// All 12 slots of a decoded statGenes string, denormalized into 48 columns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GeneSet(pub [GeneSlot; 12]);

impl GeneSet {
    fn try_from_row(row: &PgRow) -> Result<Option<Self>, sqlx::Error> {
        let mut slots = [GeneSlot::default(); 12];
        for (slot, name) in slots.iter_mut().zip(GENE_SLOTS) {
            let d: Option<i32> = row.try_get(format!("{name}_d").as_str())?;
            let Some(d) = d else { return Ok(None) };
            *slot = GeneSlot {
                d,
                r1: row.try_get(format!("{name}_r1").as_str())?,
                r2: row.try_get(format!("{name}_r2").as_str())?,
                r3: row.try_get(format!("{name}_r3").as_str())?,
            };
        }
        Ok(Some(Self(slots)))
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct TavernHero {
    pub hero_id: i64,
    pub realm: String,
    pub main_class: i32,
    pub sub_class: i32,
    pub profession: i32,
    pub rarity: i32,
    pub level: i32,
    pub generation: i32,
    pub summons: i32,
    pub max_summons: i32,
    pub strength: i32,
    pub agility: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub luck: i32,
    pub vitality: i32,
    pub endurance: i32,
    pub dexterity: i32,
    pub hp: i32,
    pub mp: i32,
    pub stamina: i32,
    pub active1: i32,
    pub active2: i32,
    pub passive1: i32,
    pub passive2: i32,
    pub stones_used: Option<i32>,
    pub trait_score: i32,
    pub combat_power: i32,
    pub sale_price_wei: BigDecimal,
    pub price_native: f64,
    pub native_token: String,
    pub genes_status: GenesStatus,
    pub batch_id: String,
}

/// Upserts one fetched hero. Refreshing a hero in a new batch updates the
/// listing data and the batch tag but leaves previously backfilled genes and
/// their status untouched.
pub async fn upsert(ex: &mut PgConnection, hero: &TavernHero) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO tavern_heroes
    (hero_id, realm, main_class, sub_class, profession, rarity, level, generation,
     summons, max_summons, strength, agility, intelligence, wisdom, luck, vitality,
     endurance, dexterity, hp, mp, stamina, active1, active2, passive1, passive2,
     stones_used, trait_score, combat_power, sale_price_wei, price_native,
     native_token, genes_status, batch_id, indexed_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
        $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
        $31, $32, $33, now())
ON CONFLICT (hero_id) DO UPDATE SET
    realm = EXCLUDED.realm,
    main_class = EXCLUDED.main_class,
    sub_class = EXCLUDED.sub_class,
    profession = EXCLUDED.profession,
    rarity = EXCLUDED.rarity,
    level = EXCLUDED.level,
    generation = EXCLUDED.generation,
    summons = EXCLUDED.summons,
    max_summons = EXCLUDED.max_summons,
    strength = EXCLUDED.strength,
    agility = EXCLUDED.agility,
    intelligence = EXCLUDED.intelligence,
    wisdom = EXCLUDED.wisdom,
    luck = EXCLUDED.luck,
    vitality = EXCLUDED.vitality,
    endurance = EXCLUDED.endurance,
    dexterity = EXCLUDED.dexterity,
    hp = EXCLUDED.hp,
    mp = EXCLUDED.mp,
    stamina = EXCLUDED.stamina,
    active1 = EXCLUDED.active1,
    active2 = EXCLUDED.active2,
    passive1 = EXCLUDED.passive1,
    passive2 = EXCLUDED.passive2,
    stones_used = EXCLUDED.stones_used,
    trait_score = EXCLUDED.trait_score,
    combat_power = EXCLUDED.combat_power,
    sale_price_wei = EXCLUDED.sale_price_wei,
    price_native = EXCLUDED.price_native,
    native_token = EXCLUDED.native_token,
    batch_id = EXCLUDED.batch_id,
    indexed_at = now();
    "#;
    sqlx::query(QUERY)
        .bind(hero.hero_id)
        .bind(&hero.realm)
        .bind(hero.main_class)
        .bind(hero.sub_class)
        .bind(hero.profession)
        .bind(hero.rarity)
        .bind(hero.level)
        .bind(hero.generation)
        .bind(hero.summons)
        .bind(hero.max_summons)
        .bind(hero.strength)
        .bind(hero.agility)
        .bind(hero.intelligence)
        .bind(hero.wisdom)
        .bind(hero.luck)
        .bind(hero.vitality)
        .bind(hero.endurance)
        .bind(hero.dexterity)
        .bind(hero.hp)
        .bind(hero.mp)
        .bind(hero.stamina)
        .bind(hero.active1)
        .bind(hero.active2)
        .bind(hero.passive1)
        .bind(hero.passive2)
        .bind(hero.stones_used)
        .bind(hero.trait_score)
        .bind(hero.combat_power)
        .bind(&hero.sale_price_wei)
        .bind(hero.price_native)
        .bind(&hero.native_token)
        .bind(hero.genes_status)
        .bind(&hero.batch_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// The stale-listing sweep: removes every hero not re-tagged by the current
/// indexing pass.
#[tracing::instrument(skip_all)]
pub async fn delete_stale(ex: &mut PgConnection, batch_id: &str) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "DELETE FROM tavern_heroes WHERE batch_id <> $1;";
    let result = sqlx::query(QUERY).bind(batch_id).execute(ex).await?;
    Ok(result.rows_affected())
}

pub async fn batch_ids(ex: &mut PgConnection) -> Result<Vec<String>, sqlx::Error> {
    const QUERY: &str = "SELECT DISTINCT batch_id FROM tavern_heroes;";
    sqlx::query_scalar(QUERY).fetch_all(ex).await
}

/// Heroes awaiting gene backfill, oldest listings first.
pub async fn fetch_pending_genes(
    ex: &mut PgConnection,
    limit: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT hero_id FROM tavern_heroes
WHERE genes_status = 'pending'
ORDER BY indexed_at
LIMIT $1;
    "#;
    sqlx::query_scalar(QUERY).bind(limit).fetch_all(ex).await
}

pub async fn store_genes(
    ex: &mut PgConnection,
    hero_id: i64,
    stat_genes: &str,
    genes: &GeneSet,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE tavern_heroes SET
    stat_genes = $2,
    class_d = $3, class_r1 = $4, class_r2 = $5, class_r3 = $6,
    sub_class_d = $7, sub_class_r1 = $8, sub_class_r2 = $9, sub_class_r3 = $10,
    profession_d = $11, profession_r1 = $12, profession_r2 = $13, profession_r3 = $14,
    passive1_d = $15, passive1_r1 = $16, passive1_r2 = $17, passive1_r3 = $18,
    passive2_d = $19, passive2_r1 = $20, passive2_r2 = $21, passive2_r3 = $22,
    active1_d = $23, active1_r1 = $24, active1_r2 = $25, active1_r3 = $26,
    active2_d = $27, active2_r1 = $28, active2_r2 = $29, active2_r3 = $30,
    stat_boost1_d = $31, stat_boost1_r1 = $32, stat_boost1_r2 = $33, stat_boost1_r3 = $34,
    stat_boost2_d = $35, stat_boost2_r1 = $36, stat_boost2_r2 = $37, stat_boost2_r3 = $38,
    stats_unknown1_d = $39, stats_unknown1_r1 = $40, stats_unknown1_r2 = $41, stats_unknown1_r3 = $42,
    element_d = $43, element_r1 = $44, element_r2 = $45, element_r3 = $46,
    stats_unknown2_d = $47, stats_unknown2_r1 = $48, stats_unknown2_r2 = $49, stats_unknown2_r3 = $50,
    genes_status = 'complete'
WHERE hero_id = $1;
    "#;
    let mut query = sqlx::query(QUERY).bind(hero_id).bind(stat_genes);
    for slot in &genes.0 {
        query = query.bind(slot.d).bind(slot.r1).bind(slot.r2).bind(slot.r3);
    }
    query.execute(ex).await?;
    Ok(())
}

pub async fn mark_genes_failed(ex: &mut PgConnection, hero_id: i64) -> Result<(), sqlx::Error> {
    const QUERY: &str = "UPDATE tavern_heroes SET genes_status = 'failed' WHERE hero_id = $1;";
    sqlx::query(QUERY).bind(hero_id).execute(ex).await?;
    Ok(())
}

/// A hero eligible for bargain-pair scoring, with its decoded genes.
#[derive(Clone, Debug)]
pub struct BargainHero {
    pub hero_id: i64,
    pub realm: String,
    pub rarity: i32,
    pub generation: i32,
    pub summons: i32,
    pub max_summons: i32,
    pub price_native: f64,
    pub native_token: String,
    pub genes: GeneSet,
}

/// Heroes with complete genes, cheapest first. `require_summons_left`
/// restricts to heroes with at least one regular summon remaining.
pub async fn fetch_bargain_candidates(
    ex: &mut PgConnection,
    require_summons_left: bool,
) -> Result<Vec<BargainHero>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT * FROM tavern_heroes
WHERE genes_status = 'complete'
  AND (NOT $1 OR max_summons - summons >= 1)
ORDER BY price_native;
    "#;
    let rows = sqlx::query(QUERY)
        .bind(require_summons_left)
        .fetch_all(&mut *ex)
        .await?;
    let mut heroes = Vec::with_capacity(rows.len());
    for row in rows {
        // genes_status = complete guarantees the gene columns are set
        let Some(genes) = GeneSet::try_from_row(&row)? else {
            continue;
        };
        heroes.push(BargainHero {
            hero_id: row.try_get("hero_id")?,
            realm: row.try_get("realm")?,
            rarity: row.try_get("rarity")?,
            generation: row.try_get("generation")?,
            summons: row.try_get("summons")?,
            max_summons: row.try_get("max_summons")?,
            price_native: row.try_get("price_native")?,
            native_token: row.try_get("native_token")?,
            genes,
        });
    }
    Ok(heroes)
}

pub async fn count(ex: &mut PgConnection) -> Result<i64, sqlx::Error> {
    const QUERY: &str = "SELECT COUNT(*) FROM tavern_heroes;";
    sqlx::query_scalar(QUERY).fetch_one(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    fn hero(hero_id: i64, batch_id: &str) -> TavernHero {
        TavernHero {
            hero_id,
            realm: "cv".to_string(),
            main_class: 0,
            sub_class: 1,
            profession: 2,
            rarity: 0,
            level: 5,
            generation: 3,
            summons: 1,
            max_summons: 8,
            strength: 10,
            agility: 11,
            intelligence: 12,
            wisdom: 13,
            luck: 14,
            vitality: 15,
            endurance: 16,
            dexterity: 17,
            hp: 200,
            mp: 50,
            stamina: 25,
            active1: 0,
            active2: 1,
            passive1: 16,
            passive2: 17,
            stones_used: None,
            trait_score: 0,
            combat_power: 108,
            sale_price_wei: BigDecimal::from(100),
            price_native: 100.0,
            native_token: "CRYSTAL".to_string(),
            genes_status: GenesStatus::Pending,
            batch_id: batch_id.to_string(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_batch_sweep() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        for id in [1, 2, 3] {
            upsert(&mut db, &hero(id, "batch_a")).await.unwrap();
        }
        for id in [2, 3, 4] {
            upsert(&mut db, &hero(id, "batch_b")).await.unwrap();
        }
        let deleted = delete_stale(&mut db, "batch_b").await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count(&mut db).await.unwrap(), 3);
        assert_eq!(batch_ids(&mut db).await.unwrap(), vec!["batch_b".to_string()]);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_gene_backfill_survives_refresh() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        upsert(&mut db, &hero(1, "batch_a")).await.unwrap();
        assert_eq!(fetch_pending_genes(&mut db, 10).await.unwrap(), vec![1]);

        let genes = GeneSet(std::array::from_fn(|i| GeneSlot {
            d: i as i32,
            r1: 1,
            r2: 2,
            r3: 3,
        }));
        store_genes(&mut db, 1, "deadbeef", &genes).await.unwrap();
        assert!(fetch_pending_genes(&mut db, 10).await.unwrap().is_empty());

        // a later batch refresh keeps the genes
        upsert(&mut db, &hero(1, "batch_b")).await.unwrap();
        let candidates = fetch_bargain_candidates(&mut db, true).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].genes, genes);

        mark_genes_failed(&mut db, 1).await.unwrap();
        assert!(fetch_bargain_candidates(&mut db, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_bargain_summons_filter() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let mut exhausted = hero(1, "b");
        exhausted.summons = 8;
        upsert(&mut db, &exhausted).await.unwrap();
        store_genes(&mut db, 1, "ff", &GeneSet::default()).await.unwrap();

        assert!(fetch_bargain_candidates(&mut db, true).await.unwrap().is_empty());
        assert_eq!(fetch_bargain_candidates(&mut db, false).await.unwrap().len(), 1);
    }
}
