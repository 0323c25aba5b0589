use crate::error::{Result, StoreError};
use crate::pool::PoolManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const MIGRATIONS_TABLE: &str = "_usb_schema_migrations";

/// Migrations compiled into the binary, in apply order.
const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[
    (
        "20161115034854_create_usb_database",
        include_str!("../../migrations/20161115034854_create_usb_database.sql"),
    ),
    (
        "20170310120000_add_services_requires",
        include_str!("../../migrations/20170310120000_add_services_requires.sql"),
    ),
];

#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub sql: String,
    pub checksum: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = compute_checksum(&sql);
        Self {
            name: name.into(),
            sql,
            checksum,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub checksum_matches: bool,
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new() -> Self {
        let migrations = EMBEDDED_MIGRATIONS
            .iter()
            .map(|(name, sql)| Migration::new(*name, *sql))
            .collect();

        Self { migrations }
    }

    /// Layer `*.sql` files from `dir` on top of the embedded migrations.
    ///
    /// The file stem is the migration name; all migrations are kept in name
    /// order, so files should carry a timestamp prefix.
    pub fn with_directory(mut self, dir: &Path) -> Result<Self> {
        let extra = find_migration_files(dir)?;

        for migration in extra {
            if self.migrations.iter().any(|m| m.name == migration.name) {
                return Err(StoreError::InvalidRequest {
                    message: format!(
                        "Migration {} in {:?} shadows an existing migration",
                        migration.name, dir
                    ),
                });
            }
            self.migrations.push(migration);
        }

        self.migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub async fn ensure_migrations_table(&self, manager: &PoolManager) -> Result<()> {
        let client = manager.client().await?;

        client
            .batch_execute(&format!(
                r#"
                CREATE SCHEMA IF NOT EXISTS "{schema}";
                CREATE TABLE IF NOT EXISTS "{schema}".{table} (
                    id SERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    checksum TEXT NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
                schema = manager.schema(),
                table = MIGRATIONS_TABLE,
            ))
            .await
            .map_err(|e| StoreError::MigrationFailed {
                migration: format!("{} table creation", MIGRATIONS_TABLE),
                cause: e.to_string(),
            })?;

        Ok(())
    }

    pub async fn applied_migrations(&self, manager: &PoolManager) -> Result<Vec<AppliedMigration>> {
        let client = manager.client().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT name, checksum, applied_at FROM {} ORDER BY id",
                    MIGRATIONS_TABLE
                ),
                &[],
            )
            .await
            .map_err(|e| StoreError::MigrationFailed {
                migration: "query applied migrations".to_string(),
                cause: e.to_string(),
            })?;

        Ok(rows
            .iter()
            .map(|row| AppliedMigration {
                name: row.get(0),
                checksum: row.get(1),
                applied_at: row.get(2),
            })
            .collect())
    }

    /// Apply every pending migration, each in its own transaction.
    ///
    /// Returns the number of migrations applied. Already-applied migrations
    /// are skipped, so calling this repeatedly is safe.
    pub async fn run_migrations(&self, manager: &PoolManager) -> Result<usize> {
        self.ensure_migrations_table(manager).await?;

        let applied = self.applied_migrations(manager).await?;
        debug!(
            "Schema {} has {} applied migrations",
            manager.schema(),
            applied.len()
        );

        let mut count = 0;

        for migration in &self.migrations {
            if let Some(existing) = applied.iter().find(|a| a.name == migration.name) {
                if existing.checksum != migration.checksum {
                    warn!(
                        "Checksum mismatch for applied migration {}: stored={}, current={}",
                        migration.name, existing.checksum, migration.checksum
                    );
                }
                debug!("Skipping already applied migration: {}", migration.name);
                continue;
            }

            info!("Applying migration: {} to schema {}", migration.name, manager.schema());
            self.apply(manager, migration).await?;

            count += 1;
            info!(
                "Successfully applied migration: {} (checksum: {})",
                migration.name, migration.checksum
            );
        }

        Ok(count)
    }

    async fn apply(&self, manager: &PoolManager, migration: &Migration) -> Result<()> {
        let mut client = manager.client().await?;

        let failed = |cause: String| StoreError::MigrationFailed {
            migration: migration.name.clone(),
            cause,
        };

        let tx = client
            .transaction()
            .await
            .map_err(|e| failed(format!("Failed to open transaction: {}", e)))?;

        tx.batch_execute(&migration.sql)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tx.execute(
            &format!(
                "INSERT INTO {} (name, checksum) VALUES ($1, $2)",
                MIGRATIONS_TABLE
            ),
            &[&migration.name, &migration.checksum],
        )
        .await
        .map_err(|e| failed(format!("Failed to record migration: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| failed(format!("Commit failed: {}", e)))?;

        Ok(())
    }

    pub async fn status(&self, manager: &PoolManager) -> Result<Vec<MigrationStatus>> {
        self.ensure_migrations_table(manager).await?;
        let applied = self.applied_migrations(manager).await?;

        Ok(build_status(&self.migrations, &applied))
    }
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn build_status(migrations: &[Migration], applied: &[AppliedMigration]) -> Vec<MigrationStatus> {
    migrations
        .iter()
        .map(|migration| match applied.iter().find(|a| a.name == migration.name) {
            Some(a) => MigrationStatus {
                name: migration.name.clone(),
                applied: true,
                applied_at: Some(a.applied_at),
                checksum_matches: a.checksum == migration.checksum,
            },
            None => MigrationStatus {
                name: migration.name.clone(),
                applied: false,
                applied_at: None,
                checksum_matches: true,
            },
        })
        .collect()
}

fn find_migration_files(migrations_dir: &Path) -> Result<Vec<Migration>> {
    if !migrations_dir.exists() {
        debug!(
            "Migrations directory {:?} does not exist, returning empty list",
            migrations_dir
        );
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
            continue;
        }

        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();

        let sql = fs::read_to_string(&path).map_err(|e| StoreError::MigrationFailed {
            migration: name.clone(),
            cause: format!("Failed to read file {:?}: {}", path, e),
        })?;

        migrations.push(Migration::new(name, sql));
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(migrations)
}

fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
