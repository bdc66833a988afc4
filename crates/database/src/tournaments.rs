use {
    crate::Address,
    sqlx::{PgConnection, types::Json},
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Tournament {
    pub tournament_id: i64,
    pub format: String,
    pub party_size: i32,
    pub restrictions: Json<serde_json::Value>,
    pub rewards: Option<Json<serde_json::Value>>,
    pub host_player: Option<Address>,
    pub opponent_player: Option<Address>,
    pub winner_player: Option<Address>,
    pub type_signature: String,
}

#[derive(Clone, Copy, Debug, sqlx::FromRow)]
pub struct Placement {
    pub tournament_id: i64,
    pub player: Address,
    pub is_winner: bool,
    pub combat_power_score: i64,
}

pub async fn upsert(ex: &mut PgConnection, tournament: &Tournament) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO pvp_tournaments
    (tournament_id, format, party_size, restrictions, rewards,
     host_player, opponent_player, winner_player, type_signature)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (tournament_id) DO UPDATE SET
    winner_player = EXCLUDED.winner_player,
    rewards = EXCLUDED.rewards,
    type_signature = EXCLUDED.type_signature;
    "#;
    sqlx::query(QUERY)
        .bind(tournament.tournament_id)
        .bind(&tournament.format)
        .bind(tournament.party_size)
        .bind(&tournament.restrictions)
        .bind(&tournament.rewards)
        .bind(tournament.host_player)
        .bind(tournament.opponent_player)
        .bind(tournament.winner_player)
        .bind(&tournament.type_signature)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn insert_placements(
    ex: &mut PgConnection,
    placements: &[Placement],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO tournament_placements (tournament_id, player, is_winner, combat_power_score)
VALUES ($1, $2, $3, $4)
ON CONFLICT DO NOTHING;
    "#;
    for placement in placements {
        sqlx::query(QUERY)
            .bind(placement.tournament_id)
            .bind(placement.player)
            .bind(placement.is_winner)
            .bind(placement.combat_power_score)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

/// Highest tournament id already indexed; pagination resumes past it.
pub async fn last_indexed_id(ex: &mut PgConnection) -> Result<Option<i64>, sqlx::Error> {
    const QUERY: &str = "SELECT MAX(tournament_id) FROM pvp_tournaments;";
    sqlx::query_scalar(QUERY).fetch_one(ex).await
}

pub async fn count(ex: &mut PgConnection) -> Result<i64, sqlx::Error> {
    const QUERY: &str = "SELECT COUNT(*) FROM pvp_tournaments;";
    sqlx::query_scalar(QUERY).fetch_one(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_tournament_roundtrip() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert_eq!(last_indexed_id(&mut db).await.unwrap(), None);

        let tournament = Tournament {
            tournament_id: 42,
            format: "solo".to_string(),
            party_size: 3,
            restrictions: Json(serde_json::json!({"minLevel": 1, "maxLevel": 20})),
            rewards: None,
            host_player: Some(Default::default()),
            opponent_player: None,
            winner_player: None,
            type_signature: "lv1-20_p3".to_string(),
        };
        upsert(&mut db, &tournament).await.unwrap();

        // a later pass fills in the winner
        let mut finished = tournament.clone();
        finished.winner_player = Some(crate::byte_array::ByteArray([1; 20]));
        upsert(&mut db, &finished).await.unwrap();

        assert_eq!(count(&mut db).await.unwrap(), 1);
        assert_eq!(last_indexed_id(&mut db).await.unwrap(), Some(42));

        let placement = Placement {
            tournament_id: 42,
            player: crate::byte_array::ByteArray([1; 20]),
            is_winner: true,
            combat_power_score: 640,
        };
        insert_placements(&mut db, &[placement, placement]).await.unwrap();
        let placements: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tournament_placements;")
            .fetch_one(&mut *db)
            .await
            .unwrap();
        assert_eq!(placements, 1);
    }
}
