use super::SqliteStore;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

impl SqliteStore {
    /// Applies every `*.sql` file in lexical order that is not yet recorded in
    /// `schema_migrations`, all inside one transaction.
    pub fn run_migrations(&mut self, migrations_dir: &Path) -> Result<usize> {
        if !migrations_dir.is_dir() {
            return Err(anyhow!(
                "migrations directory not found: {}",
                migrations_dir.display()
            ));
        }
        let files = migration_files(migrations_dir)?;

        let tx = self
            .conn
            .transaction()
            .context("failed to open sqlite migration transaction")?;
        let mut applied = 0usize;
        for (version, path) in files {
            let already_applied: Option<String> = tx
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![&version],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("failed checking migration {version}"))?;
            if already_applied.is_some() {
                continue;
            }

            let sql = fs::read_to_string(&path)
                .with_context(|| format!("failed reading migration file {}", path.display()))?;
            tx.execute_batch(&sql)
                .with_context(|| format!("failed applying migration {version}"))?;
            tx.execute(
                "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, datetime('now'))",
                params![&version],
            )
            .with_context(|| format!("failed recording migration {version}"))?;
            applied += 1;
            tracing::info!(version = %version, "migration applied");
        }
        tx.commit().context("failed to commit migrations")?;
        Ok(applied)
    }
}

fn migration_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read migrations dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let version = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("invalid migration filename: {}", path.display()))?
            .to_string();
        files.push((version, path));
    }
    files.sort();
    Ok(files)
}
