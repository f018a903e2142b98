use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::{MetaviewError, Result};
use crate::repository::{RawElementRecord, RawRelationshipRecord};

/// A set of raw records to write into the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordBatch {
    pub elements: Vec<RawElementRecord>,
    pub relationships: Vec<RawRelationshipRecord>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub elements: usize,
    pub relationships: usize,
    /// Records without a guid cannot be keyed and are left out
    pub skipped: usize,
}

fn upsert_element(tx: &Transaction<'_>, record: &RawElementRecord, source: Option<&str>) -> Result<bool> {
    let Some(guid) = record.guid.as_deref().filter(|g| !g.trim().is_empty()) else {
        return Ok(false);
    };
    let json = serde_json::to_string(record)?;
    tx.execute(
        r#"
        INSERT INTO elements (guid, type_name, record_json, source_path)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(guid) DO UPDATE SET
            type_name = excluded.type_name,
            record_json = excluded.record_json,
            source_path = excluded.source_path,
            imported_at = CURRENT_TIMESTAMP
        "#,
        params![guid, record.type_name, json, source],
    )?;
    Ok(true)
}

// Updating in place keeps seq, so repository order survives re-imports.
fn upsert_relationship(
    tx: &Transaction<'_>,
    record: &RawRelationshipRecord,
    source: Option<&str>,
) -> Result<bool> {
    let Some(guid) = record.guid.as_deref().filter(|g| !g.trim().is_empty()) else {
        return Ok(false);
    };
    let json = serde_json::to_string(record)?;
    tx.execute(
        r#"
        INSERT INTO relationships (guid, type_name, end1_guid, end2_guid, record_json, source_path)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(guid) DO UPDATE SET
            type_name = excluded.type_name,
            end1_guid = excluded.end1_guid,
            end2_guid = excluded.end2_guid,
            record_json = excluded.record_json,
            source_path = excluded.source_path,
            imported_at = CURRENT_TIMESTAMP
        "#,
        params![guid, record.type_name, record.end1_guid, record.end2_guid, json, source],
    )?;
    Ok(true)
}

/// Upsert a batch in one transaction.
pub async fn import_batch(db: &Db, batch: RecordBatch, source_path: Option<String>) -> Result<StoreCounts> {
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut counts = StoreCounts::default();
        let source = source_path.as_deref();

        for element in &batch.elements {
            if upsert_element(&tx, element, source)? {
                counts.elements += 1;
            } else {
                counts.skipped += 1;
            }
        }
        for relationship in &batch.relationships {
            if upsert_relationship(&tx, relationship, source)? {
                counts.relationships += 1;
            } else {
                counts.skipped += 1;
            }
        }

        tx.commit()?;
        Ok::<StoreCounts, MetaviewError>(counts)
    })
    .await
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub elements: i64,
    pub relationships: i64,
    /// Relationships with an end that has no element row
    pub dangling: i64,
}

pub async fn snapshot_stats(db: &Db) -> Result<SnapshotStats> {
    db.with_connection(|conn| {
        let elements = conn.query_row("SELECT COUNT(*) FROM elements", [], |row| row.get(0))?;
        let relationships = conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        let dangling = conn.query_row(
            r#"
            SELECT COUNT(*) FROM relationships r
            WHERE NOT EXISTS (SELECT 1 FROM elements e WHERE e.guid = r.end1_guid)
               OR NOT EXISTS (SELECT 1 FROM elements e WHERE e.guid = r.end2_guid)
            "#,
            [],
            |row| row.get(0),
        )?;
        Ok(SnapshotStats {
            elements,
            relationships,
            dangling,
        })
    })
    .await
}
