//! Database module
//!
//! Database connection and migration utilities.

use sqlx::PgPool;

/// Tables the ledger cannot run without
const REQUIRED_TABLES: &[&str] = &[
    "vaults",
    "registers",
    "register_sessions",
    "movements",
    "reconciliations",
    "idempotency_keys",
];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the SQL migrations under `migrations/`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    // The movement log must refuse UPDATE and DELETE.
    let guarded: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.triggers
            WHERE event_object_table = 'movements' AND event_manipulation IN ('UPDATE', 'DELETE')
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !guarded {
        tracing::error!("Append-only trigger on 'movements' is missing");
        return Ok(false);
    }

    Ok(true)
}
