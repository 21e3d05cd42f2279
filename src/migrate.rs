use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index; idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Scheme and raw-iri lists are JSON arrays
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_identifier (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sufficiently_unique_iri TEXT NOT NULL UNIQUE,
            scheme_list TEXT NOT NULL DEFAULT '[]',
            raw_iri_list TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_record (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_config_label TEXT NOT NULL,
            source_record_identifier TEXT NOT NULL,
            replaced_by INTEGER,
            UNIQUE(source_config_label, source_record_identifier),
            FOREIGN KEY (replaced_by) REFERENCES source_record(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexcard (
            uuid TEXT PRIMARY KEY,
            source_record_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            deleted INTEGER,
            FOREIGN KEY (source_record_id) REFERENCES source_record(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in [
        "indexcard_focus_identifier",
        "indexcard_focustype_identifier",
    ] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                indexcard_uuid TEXT NOT NULL,
                identifier_id INTEGER NOT NULL,
                PRIMARY KEY (indexcard_uuid, identifier_id),
                FOREIGN KEY (indexcard_uuid) REFERENCES indexcard(uuid),
                FOREIGN KEY (identifier_id) REFERENCES resource_identifier(id)
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS latest_indexcard_rdf (
            indexcard_uuid TEXT PRIMARY KEY,
            focus_iri TEXT NOT NULL,
            rdf_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            modified INTEGER NOT NULL,
            FOREIGN KEY (indexcard_uuid) REFERENCES indexcard(uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archived_indexcard_rdf (
            indexcard_uuid TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            focus_iri TEXT NOT NULL,
            rdf_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(indexcard_uuid, content_hash),
            FOREIGN KEY (indexcard_uuid) REFERENCES indexcard(uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Message queues, one per strategy; a row is claimed while a consumer works on it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_message (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue_name TEXT NOT NULL,
            message_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            claimed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_backfill (
            strategy_name TEXT PRIMARY KEY,
            specific_indexname TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            modified INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_indexcard_source_record ON indexcard(source_record_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_message_unclaimed ON search_message(queue_name, claimed_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
