use async_trait::async_trait;
use std::path::PathBuf;

use super::{MetadataRepository, PageRequest, RawElementRecord, RawRelationshipRecord, RelatedRecord, TraversalDirection};
use crate::db::Db;
use crate::error::{MetaviewError, Result};

/// Repository over a local SQLite snapshot written by the importer.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    db: Db,
}

impl SqliteRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open the snapshot at `db_path`, applying pending migrations first.
    pub async fn open(db_path: PathBuf, migrations_dir: Option<PathBuf>) -> Result<Self> {
        let db = Db::new(db_path);
        db.migrate(migrations_dir).await?;
        Ok(Self::new(db))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn decode<T: serde::de::DeserializeOwned>(guid: &str, json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| MetaviewError::MalformedRecord(format!("stored record {}: {}", guid, e)))
}

fn direction_clause(direction: TraversalDirection) -> (&'static str, usize) {
    match direction {
        TraversalDirection::Outgoing => ("r.end1_guid = ?", 1),
        TraversalDirection::Incoming => ("r.end2_guid = ?", 1),
        TraversalDirection::Both => ("(r.end1_guid = ? OR r.end2_guid = ?)", 2),
    }
}

#[async_trait]
impl MetadataRepository for SqliteRepository {
    async fn get_element(&self, guid: &str) -> Result<RawElementRecord> {
        let guid = guid.to_string();
        self.db
            .with_connection(move |conn| {
                let row: Option<String> = match conn.query_row(
                    "SELECT record_json FROM elements WHERE guid = ?1",
                    [&guid],
                    |row| row.get(0),
                ) {
                    Ok(json) => Some(json),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };
                match row {
                    Some(json) => decode(&guid, &json),
                    None => Err(MetaviewError::NotFound(guid)),
                }
            })
            .await
    }

    async fn get_relationships(
        &self,
        guid: &str,
        relationship_types: &[String],
        direction: TraversalDirection,
        page: PageRequest,
    ) -> Result<Vec<RelatedRecord>> {
        let guid = guid.to_string();
        let types = relationship_types.to_vec();

        self.db
            .with_connection(move |conn| {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM elements WHERE guid = ?1",
                    [&guid],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(MetaviewError::NotFound(guid));
                }
                if types.is_empty() || page.page_size == 0 {
                    return Ok(Vec::new());
                }

                let (clause, guid_uses) = direction_clause(direction);
                let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let query = format!(
                    "SELECT r.guid, r.record_json, e.record_json \
                     FROM relationships r \
                     LEFT JOIN elements e ON e.guid = \
                        CASE WHEN r.end1_guid = ? THEN r.end2_guid ELSE r.end1_guid END \
                     WHERE {} AND r.type_name IN ({}) \
                     ORDER BY r.seq LIMIT ? OFFSET ?",
                    clause, placeholders
                );

                let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(guid.clone())];
                for _ in 0..guid_uses {
                    params.push(Box::new(guid.clone()));
                }
                for t in &types {
                    params.push(Box::new(t.clone()));
                }
                params.push(Box::new(page.page_size as i64));
                params.push(Box::new(page.start_from as i64));

                let mut stmt = conn.prepare(&query)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

                let mut out = Vec::with_capacity(rows.len());
                for (rel_guid, rel_json, element_json) in rows {
                    let relationship: RawRelationshipRecord = decode(&rel_guid, &rel_json)?;
                    let element = match element_json {
                        Some(json) => Some(decode::<RawElementRecord>(&rel_guid, &json)?),
                        None => None,
                    };
                    out.push(RelatedRecord {
                        relationship,
                        element,
                    });
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{import_batch, RecordBatch};
    use crate::repository::InMemoryRepository;
    use serde_json::json;
    use tempfile::TempDir;

    fn batch() -> RecordBatch {
        RecordBatch {
            elements: vec![
                RawElementRecord::new("c1", "Collection", json!({"displayName": "Root"})),
                RawElementRecord::new("m1", "Asset", json!({})),
                RawElementRecord::new("m2", "Asset", json!({})),
                RawElementRecord::new("c2", "Collection", json!({})),
            ],
            relationships: vec![
                RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1"),
                RawRelationshipRecord::new("r2", "CollectionMembership", "c1", "m2"),
                RawRelationshipRecord::new("r3", "CollectionMembership", "c1", "c2"),
                RawRelationshipRecord::new("r4", "CollectionMembership", "c2", "m2"),
                RawRelationshipRecord::new("r5", "ResourceList", "c1", "m1"),
                RawRelationshipRecord::new("r6", "CollectionMembership", "c1", "ghost"),
            ],
        }
    }

    async fn sqlite_repo(dir: &TempDir) -> SqliteRepository {
        let repo = SqliteRepository::open(dir.path().join("snap.db"), None).await.unwrap();
        import_batch(repo.db(), batch(), None).await.unwrap();
        repo
    }

    fn memory_repo() -> InMemoryRepository {
        let batch = batch();
        let mut repo = InMemoryRepository::new();
        for e in batch.elements {
            let key = e.guid.clone().unwrap();
            repo = repo.with_element_record(&key, e);
        }
        for r in batch.relationships {
            repo = repo.with_relationship_record(r);
        }
        repo
    }

    fn types() -> Vec<String> {
        vec!["CollectionMembership".to_string()]
    }

    #[tokio::test]
    async fn test_get_element() {
        let dir = TempDir::new().unwrap();
        let repo = sqlite_repo(&dir).await;
        let record = repo.get_element("c1").await.unwrap();
        assert_eq!(record.type_name.as_deref(), Some("Collection"));
        assert!(matches!(repo.get_element("zz").await, Err(MetaviewError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_parity_with_memory() {
        let dir = TempDir::new().unwrap();
        let sqlite = sqlite_repo(&dir).await;
        let memory = memory_repo();

        for (guid, direction) in [
            ("c1", TraversalDirection::Outgoing),
            ("m2", TraversalDirection::Incoming),
            ("c2", TraversalDirection::Both),
        ] {
            for page in [PageRequest::first(2), PageRequest::first(2).next(), PageRequest::first(50)] {
                let a = sqlite.get_relationships(guid, &types(), direction, page).await.unwrap();
                let b = memory.get_relationships(guid, &types(), direction, page).await.unwrap();
                assert_eq!(a, b, "{} {:?} {:?}", guid, direction, page);
            }
        }
    }

    #[tokio::test]
    async fn test_dangling_far_end() {
        let dir = TempDir::new().unwrap();
        let repo = sqlite_repo(&dir).await;
        let page = repo
            .get_relationships("c1", &types(), TraversalDirection::Outgoing, PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(page.len(), 4);
        assert!(page[3].element.is_none());
    }

    #[tokio::test]
    async fn test_unknown_start() {
        let dir = TempDir::new().unwrap();
        let repo = sqlite_repo(&dir).await;
        let err = repo
            .get_relationships("nope", &types(), TraversalDirection::Both, PageRequest::first(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MetaviewError::NotFound(_)));
    }
}
