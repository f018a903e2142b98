//! Load record fixtures from disk into the SQLite snapshot.
//!
//! A fixture is a JSON or YAML document shaped `{elements: [...], relationships: [...]}`
//! using the same camelCase record fields the repository returns.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::db::store::{import_batch, RecordBatch, StoreCounts};
use crate::db::Db;
use crate::error::{MetaviewError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureFormat {
    Json,
    Yaml,
}

impl FixtureFormat {
    fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "json" => Some(FixtureFormat::Json),
            "yaml" | "yml" => Some(FixtureFormat::Yaml),
            _ => None,
        }
    }
}

/// A discovered fixture file
#[derive(Debug, Clone)]
pub struct FixtureFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub format: FixtureFormat,
}

/// Find every `.json`, `.yaml` and `.yml` file under `root`, sorted by relative path.
pub fn discover_fixtures(root: &Path) -> Result<Vec<FixtureFile>> {
    if !root.is_dir() {
        return Err(MetaviewError::InvalidInput(format!(
            "fixture root is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        let Some(format) = FixtureFormat::from_extension(&extension) else {
            continue;
        };
        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| {
                MetaviewError::Config(format!("Failed to compute relative path for: {}", path.display()))
            })?
            .to_string_lossy()
            .replace('\\', "/");
        files.push(FixtureFile {
            relative_path,
            absolute_path: path.to_path_buf(),
            format,
        });
    }

    // Later files win on guid conflicts, so the order has to be stable.
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    log::info!("Discovered {} fixture files in {}", files.len(), root.display());
    Ok(files)
}

pub fn parse_fixture(content: &str, format: FixtureFormat, path: &str) -> Result<RecordBatch> {
    match format {
        FixtureFormat::Json => serde_json::from_str(content)
            .map_err(|e| MetaviewError::Parse(format!("{}: {}", path, e))),
        FixtureFormat::Yaml => serde_yaml_ng::from_str(content)
            .map_err(|e| MetaviewError::Parse(format!("{}: {}", path, e))),
    }
}

/// Hex SHA-256 of a fixture's bytes, reported so re-imports can be compared.
pub fn fixture_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFile {
    pub relative_path: String,
    pub digest: String,
    pub counts: StoreCounts,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: Vec<ImportedFile>,
    /// Files that could not be read or parsed, with the reason
    pub failed: Vec<(String, String)>,
}

impl ImportReport {
    pub fn totals(&self) -> StoreCounts {
        self.imported.iter().fold(StoreCounts::default(), |mut acc, f| {
            acc.elements += f.counts.elements;
            acc.relationships += f.counts.relationships;
            acc.skipped += f.counts.skipped;
            acc
        })
    }
}

pub async fn import_file(db: &Db, file: &FixtureFile) -> Result<ImportedFile> {
    let bytes = std::fs::read(&file.absolute_path)?;
    let content = String::from_utf8(bytes)
        .map_err(|_| MetaviewError::Parse(format!("{}: not valid UTF-8", file.relative_path)))?;
    let batch = parse_fixture(&content, file.format, &file.relative_path)?;
    if batch.is_empty() {
        log::warn!("{} holds no elements or relationships", file.relative_path);
    }
    let digest = fixture_digest(content.as_bytes());
    let counts = import_batch(db, batch, Some(file.relative_path.clone())).await?;
    Ok(ImportedFile {
        relative_path: file.relative_path.clone(),
        digest,
        counts,
    })
}

/// Import every fixture under `root`. A bad file is reported and skipped; database
/// errors abort the run.
pub async fn import_dir(db: &Db, root: &Path) -> Result<ImportReport> {
    let files = discover_fixtures(root)?;
    let mut report = ImportReport::default();

    for (idx, file) in files.iter().enumerate() {
        log::debug!("[{}/{}] Importing {}", idx + 1, files.len(), file.relative_path);
        match import_file(db, file).await {
            Ok(imported) => {
                log::info!(
                    "{}: {} elements, {} relationships, {} skipped",
                    imported.relative_path,
                    imported.counts.elements,
                    imported.counts.relationships,
                    imported.counts.skipped
                );
                report.imported.push(imported);
            }
            Err(e @ MetaviewError::Database(_)) => return Err(e),
            Err(e) => {
                log::error!("{}: {}", file.relative_path, e);
                report.failed.push((file.relative_path.clone(), e.to_string()));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::snapshot_stats;
    use crate::repository::{MetadataRepository, SqliteRepository};
    use std::fs;
    use tempfile::TempDir;

    const JSON_FIXTURE: &str = r#"{
        "elements": [
            {"guid": "c1", "typeName": "Collection", "properties": {"displayName": "Root"}},
            {"guid": "m1", "typeName": "Asset", "properties": {"qualifiedName": "asset::orders"}}
        ],
        "relationships": [
            {"guid": "r1", "typeName": "CollectionMembership", "end1Guid": "c1", "end2Guid": "m1"}
        ]
    }"#;

    const YAML_FIXTURE: &str = r#"
elements:
  - guid: m2
    typeName: Asset
    properties:
      displayName: Customers
relationships:
  - guid: r2
    typeName: CollectionMembership
    end1Guid: c1
    end2Guid: m2
"#;

    #[test]
    fn test_discover_fixtures() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("b.json"), "{}").unwrap();
        fs::write(root.join("nested/a.yml"), "{}").unwrap();
        fs::write(root.join("c.YAML"), "{}").unwrap();
        fs::write(root.join("notes.md"), "# skip").unwrap();

        let files = discover_fixtures(root).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["b.json", "c.YAML", "nested/a.yml"]);
        assert_eq!(files[1].format, FixtureFormat::Yaml);
    }

    #[test]
    fn test_discover_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.json");
        fs::write(&file, "{}").unwrap();
        assert!(matches!(discover_fixtures(&file), Err(MetaviewError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_fixture_formats() {
        let batch = parse_fixture(JSON_FIXTURE, FixtureFormat::Json, "a.json").unwrap();
        assert_eq!(batch.elements.len(), 2);
        assert_eq!(batch.relationships[0].end2_guid.as_deref(), Some("m1"));

        let batch = parse_fixture(YAML_FIXTURE, FixtureFormat::Yaml, "b.yaml").unwrap();
        assert_eq!(batch.elements[0].properties["displayName"], "Customers");
        assert!(!batch.is_empty());
        assert!(parse_fixture("{}", FixtureFormat::Json, "empty.json").unwrap().is_empty());
        assert!(matches!(
            parse_fixture("elements: [", FixtureFormat::Yaml, "bad.yaml"),
            Err(MetaviewError::Parse(msg)) if msg.starts_with("bad.yaml")
        ));
    }

    #[tokio::test]
    async fn test_import_dir_into_repository() {
        let dir = TempDir::new().unwrap();
        let fixtures = dir.path().join("fixtures");
        fs::create_dir_all(&fixtures).unwrap();
        fs::write(fixtures.join("01-base.json"), JSON_FIXTURE).unwrap();
        fs::write(fixtures.join("02-more.yaml"), YAML_FIXTURE).unwrap();
        fs::write(fixtures.join("03-broken.json"), "{ nope").unwrap();

        let repo = SqliteRepository::open(dir.path().join("snapshot.db"), None).await.unwrap();
        let report = import_dir(repo.db(), &fixtures).await.unwrap();

        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "03-broken.json");
        let totals = report.totals();
        assert_eq!((totals.elements, totals.relationships), (3, 2));
        assert_eq!(report.imported[0].digest, fixture_digest(JSON_FIXTURE.as_bytes()));

        let stats = snapshot_stats(repo.db()).await.unwrap();
        assert_eq!(stats.dangling, 0);
        let record = repo.get_element("m2").await.unwrap();
        assert_eq!(record.type_name.as_deref(), Some("Asset"));
    }
}
