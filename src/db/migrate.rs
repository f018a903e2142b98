use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use crate::error::{MetaviewError, Result};

/// Migrations compiled into the binary, used when no directory is configured
pub const EMBEDDED: &[(&str, &str)] = &[
    (
        "001_metadata_store.sql",
        include_str!("../../migrations/001_metadata_store.sql"),
    ),
    (
        "002_relationship_indexes.sql",
        include_str!("../../migrations/002_relationship_indexes.sql"),
    ),
];

struct Migration {
    version: u32,
    name: String,
    sql: String,
}

impl Migration {
    /// "001_metadata_store.sql" -> version 1, name "001_metadata_store"
    fn parse(filename: &str, sql: String) -> Result<Self> {
        let version_str = filename
            .split('_')
            .next()
            .ok_or_else(|| MetaviewError::Config(format!("Invalid migration filename: {}", filename)))?;
        let version: u32 = version_str
            .parse()
            .map_err(|_| MetaviewError::Config(format!("Invalid migration version: {}", version_str)))?;
        Ok(Self {
            version,
            name: filename.trim_end_matches(".sql").to_string(),
            sql,
        })
    }
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut files: Vec<_> = fs::read_dir(migrations_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    let mut migrations = Vec::new();
    for entry in files {
        let path = entry.path();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MetaviewError::Config("Invalid migration filename".to_string()))?;
        migrations.push(Migration::parse(filename, fs::read_to_string(&path)?)?);
    }
    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

fn apply(conn: &mut Connection, migrations: Vec<Migration>) -> Result<()> {
    ensure_migrations_table(conn)?;
    let applied = get_applied_migrations(conn)?;

    for migration in migrations {
        if applied.contains(&migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            log::error!("Failed to execute migration {}: {}", migration.name, e);
            MetaviewError::Database(e)
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    log::debug!("All migrations completed");
    Ok(())
}

/// Run pending migrations found in `migrations_dir`
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    let migrations = load_migrations(migrations_dir)?;
    apply(conn, migrations)
}

/// Run pending bundled migrations
pub fn run_embedded_migrations(conn: &mut Connection) -> Result<()> {
    let migrations = EMBEDDED
        .iter()
        .map(|(name, sql)| Migration::parse(name, sql.to_string()))
        .collect::<Result<Vec<_>>>()?;
    apply(conn, migrations)
}
