//! SQLite-backed indexcard store, identifier registry and backfill records.
//!
//! Implements the core storage traits over the tables created by
//! [`crate::migrate`]. Multi-statement writes run in one transaction.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use trovesearch_core::error::RdfError;
use trovesearch_core::iri::{sufficiently_unique_iri, ResourceIdentifier};
use trovesearch_core::rdf::RdfGraph;
use trovesearch_core::store::{
    content_hash, focus_type_iris, IdentifierRegistry, Indexcard, IndexcardRdf, IndexcardSource,
    IndexcardStore, LatestRdf, SourceRecordKey,
};
use trovesearch_core::strategy::backfill::{BackfillStore, IndexBackfill};

#[derive(Clone)]
pub struct SqliteIndexcardStore {
    pool: SqlitePool,
}

impl SqliteIndexcardStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn identifiers_for_card(&self, table: &str, uuid: &str) -> Result<Vec<ResourceIdentifier>> {
        let rows = sqlx::query(&format!(
            "SELECT r.id, r.sufficiently_unique_iri, r.scheme_list, r.raw_iri_list \
             FROM resource_identifier r JOIN {table} t ON t.identifier_id = r.id \
             WHERE t.indexcard_uuid = ? ORDER BY r.id"
        ))
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_identifier).collect()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_identifier(row: &SqliteRow) -> Result<ResourceIdentifier> {
    let scheme_list: String = row.get("scheme_list");
    let raw_iri_list: String = row.get("raw_iri_list");
    Ok(ResourceIdentifier {
        id: row.get("id"),
        sufficiently_unique_iri: row.get("sufficiently_unique_iri"),
        scheme_list: serde_json::from_str(&scheme_list).context("bad scheme_list")?,
        raw_iri_list: serde_json::from_str(&raw_iri_list).context("bad raw_iri_list")?,
    })
}

async fn source_record_id(
    tx: &mut Transaction<'_, Sqlite>,
    source: &SourceRecordKey,
) -> Result<i64> {
    sqlx::query(
        "INSERT INTO source_record (source_config_label, source_record_identifier) VALUES (?, ?) \
         ON CONFLICT(source_config_label, source_record_identifier) DO NOTHING",
    )
    .bind(&source.source_config_label)
    .bind(&source.source_record_identifier)
    .execute(&mut **tx)
    .await?;
    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM source_record WHERE source_config_label = ? AND source_record_identifier = ?",
    )
    .bind(&source.source_config_label)
    .bind(&source.source_record_identifier)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn replace_card_identifiers(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    uuid: &str,
    identifiers: &[ResourceIdentifier],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE indexcard_uuid = ?"))
        .bind(uuid)
        .execute(&mut **tx)
        .await?;
    for identifier in identifiers {
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {table} (indexcard_uuid, identifier_id) VALUES (?, ?)"
        ))
        .bind(uuid)
        .bind(identifier.id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl IdentifierRegistry for SqliteIndexcardStore {
    async fn get_or_create_for_iri(&self, iri: &str) -> Result<ResourceIdentifier> {
        let suffuniq = sufficiently_unique_iri(iri)?;
        let fresh = ResourceIdentifier::first_seen(iri)?;
        sqlx::query(
            "INSERT INTO resource_identifier (sufficiently_unique_iri, scheme_list, raw_iri_list) \
             VALUES (?, ?, ?) ON CONFLICT(sufficiently_unique_iri) DO NOTHING",
        )
        .bind(&suffuniq)
        .bind(serde_json::to_string(&fresh.scheme_list)?)
        .bind(serde_json::to_string(&fresh.raw_iri_list)?)
        .execute(&self.pool)
        .await?;

        let mut identifier = self
            .get_for_iri(iri)
            .await?
            .with_context(|| format!("identifier vanished for {iri}"))?;
        if identifier.observe(iri)? {
            sqlx::query(
                "UPDATE resource_identifier SET scheme_list = ?, raw_iri_list = ? WHERE id = ?",
            )
            .bind(serde_json::to_string(&identifier.scheme_list)?)
            .bind(serde_json::to_string(&identifier.raw_iri_list)?)
            .bind(identifier.id)
            .execute(&self.pool)
            .await?;
        }
        Ok(identifier)
    }

    async fn get_for_iri(&self, iri: &str) -> Result<Option<ResourceIdentifier>> {
        let suffuniq = sufficiently_unique_iri(iri)?;
        let row = sqlx::query(
            "SELECT id, sufficiently_unique_iri, scheme_list, raw_iri_list \
             FROM resource_identifier WHERE sufficiently_unique_iri = ?",
        )
        .bind(&suffuniq)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_identifier).transpose()
    }
}

#[async_trait]
impl IndexcardSource for SqliteIndexcardStore {
    async fn latest_rdf_for_indexcards(&self, uuids: &[String]) -> Result<Vec<IndexcardRdf>> {
        let mut found = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            let row = sqlx::query(
                r#"
                SELECT i.uuid, l.focus_iri, l.rdf_json, l.content_hash,
                       s.source_config_label, s.source_record_identifier, s.replaced_by
                FROM indexcard i
                JOIN latest_indexcard_rdf l ON l.indexcard_uuid = i.uuid
                JOIN source_record s ON s.id = i.source_record_id
                WHERE i.uuid = ? AND i.deleted IS NULL
                "#,
            )
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
            let Some(row) = row else {
                continue;
            };
            let rdf_json: String = row.get("rdf_json");
            let replaced_by: Option<i64> = row.get("replaced_by");
            found.push(IndexcardRdf {
                indexcard_uuid: row.get("uuid"),
                focus_iri: row.get("focus_iri"),
                rdf: RdfGraph::from_json(&rdf_json)
                    .with_context(|| format!("stored rdf for indexcard {uuid}"))?,
                content_hash: row.get("content_hash"),
                source_config_label: row.get("source_config_label"),
                source_record_identifier: row.get("source_record_identifier"),
                is_superseded: replaced_by.is_some(),
            });
        }
        Ok(found)
    }

    async fn all_indexcard_uuids(&self) -> Result<Vec<String>> {
        let uuids: Vec<String> =
            sqlx::query_scalar("SELECT uuid FROM indexcard WHERE deleted IS NULL ORDER BY uuid")
                .fetch_all(&self.pool)
                .await?;
        Ok(uuids)
    }
}

#[async_trait]
impl IndexcardStore for SqliteIndexcardStore {
    async fn save_indexcard_from_graph(
        &self,
        source: &SourceRecordKey,
        focus_iri: &str,
        graph: &RdfGraph,
    ) -> Result<Indexcard> {
        if !graph.has_subject(focus_iri) {
            return Err(RdfError::IriMismatch(focus_iri.to_string()).into());
        }
        let focus_identifiers = self.save_equivalent_identifier_set(graph, focus_iri).await?;
        let type_iris: Vec<String> = focus_type_iris(graph, focus_iri).into_iter().collect();
        let focustype_identifiers = self.identifiers_for_iris(&type_iris).await?;
        let rdf_json = graph.to_canonical_json();
        let hash = content_hash(&rdf_json);
        let now = Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        let record_id = source_record_id(&mut tx, source).await?;

        let mut existing_uuid: Option<String> = None;
        for identifier in &focus_identifiers {
            existing_uuid = sqlx::query_scalar(
                "SELECT i.uuid FROM indexcard i \
                 JOIN indexcard_focus_identifier f ON f.indexcard_uuid = i.uuid \
                 WHERE i.source_record_id = ? AND f.identifier_id = ? LIMIT 1",
            )
            .bind(record_id)
            .bind(identifier.id)
            .fetch_optional(&mut *tx)
            .await?;
            if existing_uuid.is_some() {
                break;
            }
        }
        let uuid = match existing_uuid {
            Some(uuid) => uuid,
            None => {
                let uuid = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO indexcard (uuid, source_record_id, created_at) VALUES (?, ?, ?)",
                )
                .bind(&uuid)
                .bind(record_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                debug!(indexcard = %uuid, focus = focus_iri, "new indexcard");
                uuid
            }
        };

        let archived: Option<String> = sqlx::query_scalar(
            "SELECT rdf_json FROM archived_indexcard_rdf WHERE indexcard_uuid = ? AND content_hash = ?",
        )
        .bind(&uuid)
        .bind(&hash)
        .fetch_optional(&mut *tx)
        .await?;
        match archived {
            Some(archived) if archived != rdf_json => {
                bail!("content hash collision for indexcard {uuid}: {hash}")
            }
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO archived_indexcard_rdf \
                     (indexcard_uuid, content_hash, focus_iri, rdf_json, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&uuid)
                .bind(&hash)
                .bind(focus_iri)
                .bind(&rdf_json)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        replace_card_identifiers(&mut tx, "indexcard_focus_identifier", &uuid, &focus_identifiers)
            .await?;
        replace_card_identifiers(
            &mut tx,
            "indexcard_focustype_identifier",
            &uuid,
            &focustype_identifiers,
        )
        .await?;

        let deleted: Option<i64> =
            sqlx::query_scalar("SELECT deleted FROM indexcard WHERE uuid = ?")
                .bind(&uuid)
                .fetch_one(&mut *tx)
                .await?;
        if deleted.is_none() {
            sqlx::query(
                r#"
                INSERT INTO latest_indexcard_rdf (indexcard_uuid, focus_iri, rdf_json, content_hash, modified)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(indexcard_uuid) DO UPDATE SET
                    focus_iri = excluded.focus_iri,
                    rdf_json = excluded.rdf_json,
                    content_hash = excluded.content_hash,
                    modified = excluded.modified
                "#,
            )
            .bind(&uuid)
            .bind(focus_iri)
            .bind(&rdf_json)
            .bind(&hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_indexcard(&uuid)
            .await?
            .with_context(|| format!("indexcard {uuid} missing after save"))
    }

    async fn delete_indexcard(&self, uuid: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE indexcard SET deleted = ? WHERE uuid = ? AND deleted IS NULL")
            .bind(Utc::now().timestamp())
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            sqlx::query("DELETE FROM latest_indexcard_rdf WHERE indexcard_uuid = ?")
                .bind(uuid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn get_indexcard(&self, uuid: &str) -> Result<Option<Indexcard>> {
        let row = sqlx::query(
            r#"
            SELECT i.uuid, i.deleted, s.source_config_label, s.source_record_identifier,
                   l.focus_iri, l.rdf_json, l.content_hash, l.modified
            FROM indexcard i
            JOIN source_record s ON s.id = i.source_record_id
            LEFT JOIN latest_indexcard_rdf l ON l.indexcard_uuid = i.uuid
            WHERE i.uuid = ?
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let deleted: Option<i64> = row.get("deleted");
        let focus_iri: Option<String> = row.get("focus_iri");
        let latest_rdf = match focus_iri {
            Some(focus_iri) => {
                let modified: i64 = row.get("modified");
                Some(LatestRdf {
                    focus_iri,
                    rdf_json: row.get("rdf_json"),
                    content_hash: row.get("content_hash"),
                    modified: timestamp(modified),
                })
            }
            None => None,
        };
        Ok(Some(Indexcard {
            uuid: row.get("uuid"),
            deleted: deleted.map(timestamp),
            source_record: SourceRecordKey::new(
                row.get::<String, _>("source_config_label"),
                row.get::<String, _>("source_record_identifier"),
            ),
            focus_identifiers: self
                .identifiers_for_card("indexcard_focus_identifier", uuid)
                .await?,
            focustype_identifiers: self
                .identifiers_for_card("indexcard_focustype_identifier", uuid)
                .await?,
            latest_rdf,
        }))
    }

    async fn mark_source_record_replaced(
        &self,
        old: &SourceRecordKey,
        new: &SourceRecordKey,
    ) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let old_id = source_record_id(&mut tx, old).await?;
        let new_id = source_record_id(&mut tx, new).await?;
        sqlx::query("UPDATE source_record SET replaced_by = ? WHERE id = ?")
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        let uuids: Vec<String> =
            sqlx::query_scalar("SELECT uuid FROM indexcard WHERE source_record_id = ? ORDER BY uuid")
                .bind(old_id)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(uuids)
    }
}

#[async_trait]
impl BackfillStore for SqliteIndexcardStore {
    async fn get_backfill(&self, strategy_name: &str) -> Result<Option<IndexBackfill>> {
        let row = sqlx::query(
            "SELECT strategy_name, specific_indexname, status, error_message, modified \
             FROM index_backfill WHERE strategy_name = ?",
        )
        .bind(strategy_name)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get("status");
        let modified: i64 = row.get("modified");
        Ok(Some(IndexBackfill {
            strategy_name: row.get("strategy_name"),
            specific_indexname: row.get("specific_indexname"),
            status: status.parse()?,
            error_message: row.get("error_message"),
            modified: timestamp(modified),
        }))
    }

    async fn save_backfill(&self, backfill: &IndexBackfill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_backfill (strategy_name, specific_indexname, status, error_message, modified)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(strategy_name) DO UPDATE SET
                specific_indexname = excluded.specific_indexname,
                status = excluded.status,
                error_message = excluded.error_message,
                modified = excluded.modified
            "#,
        )
        .bind(&backfill.strategy_name)
        .bind(&backfill.specific_indexname)
        .bind(backfill.status.as_str())
        .bind(&backfill.error_message)
        .bind(backfill.modified.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
