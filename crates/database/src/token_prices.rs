use sqlx::PgConnection;

/// USD prices maintained by an external price oracle job. This crate only
/// reads them; the bargain engine needs CRYSTAL and JEWEL.
pub async fn fetch(ex: &mut PgConnection, token: &str) -> Result<Option<f64>, sqlx::Error> {
    const QUERY: &str = "SELECT price_usd FROM token_price_graph WHERE token = $1;";
    sqlx::query_scalar(QUERY).bind(token).fetch_optional(ex).await
}

/// Test/bootstrap helper.
pub async fn upsert(ex: &mut PgConnection, token: &str, price_usd: f64) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO token_price_graph (token, price_usd, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (token) DO UPDATE SET price_usd = EXCLUDED.price_usd, updated_at = now();
    "#;
    sqlx::query(QUERY).bind(token).bind(price_usd).execute(ex).await?;
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
    async fn postgres_token_price_roundtrip() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert_eq!(fetch(&mut db, "CRYSTAL").await.unwrap(), None);
        upsert(&mut db, "CRYSTAL", 0.2).await.unwrap();
        upsert(&mut db, "CRYSTAL", 0.25).await.unwrap();
        assert_eq!(fetch(&mut db, "CRYSTAL").await.unwrap(), Some(0.25));
    }
}
