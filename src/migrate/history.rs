//! Applied-migration ledger.
//!
//! Records which migrations have run in a `_pgtenants_migrations` table in
//! the public schema, with a checksum so drift between the recorded and
//! on-disk content is detectable.

use crate::error::{EngineError, Result};
use sha2::{Digest, Sha256};
use tokio_postgres::GenericClient;
use tracing::warn;

pub const HISTORY_TABLE: &str = "_pgtenants_migrations";

pub struct MigrationHistory;

impl MigrationHistory {
    pub fn new() -> Self {
        Self
    }

    pub async fn ensure_table<C>(&self, client: &C) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        client
            .batch_execute(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    checksum TEXT NOT NULL,
                    applied_at TIMESTAMPTZ DEFAULT NOW()
                )
                "#,
                HISTORY_TABLE
            ))
            .await
            .map_err(|e| EngineError::MigrationFailed {
                migration: format!("{} table creation", HISTORY_TABLE),
                cause: e.to_string(),
            })?;

        Ok(())
    }

    /// Names of applied migrations, in application order.
    pub async fn applied<C>(&self, client: &C) -> Result<Vec<String>>
    where
        C: GenericClient + Sync,
    {
        let sql = format!("SELECT name FROM {} ORDER BY id", HISTORY_TABLE);
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| EngineError::MigrationFailed {
                migration: "query applied migrations".to_string(),
                cause: e.to_string(),
            })?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    pub async fn record<C>(&self, client: &C, name: &str, checksum: &str) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        let sql = format!(
            "INSERT INTO {} (name, checksum) VALUES ($1, $2)",
            HISTORY_TABLE
        );
        client
            .execute(sql.as_str(), &[&name, &checksum])
            .await
            .map_err(|e| EngineError::MigrationFailed {
                migration: name.to_string(),
                cause: format!("Failed to record migration: {}", e),
            })?;

        Ok(())
    }

    /// True when the recorded checksum matches; false (with a warning) when
    /// the migration content changed after it was applied.
    pub async fn verify_checksum<C>(
        &self,
        client: &C,
        name: &str,
        expected_checksum: &str,
    ) -> Result<bool>
    where
        C: GenericClient + Sync,
    {
        let sql = format!("SELECT checksum FROM {} WHERE name = $1", HISTORY_TABLE);
        let row = client
            .query_opt(sql.as_str(), &[&name])
            .await
            .map_err(|e| EngineError::MigrationFailed {
                migration: name.to_string(),
                cause: e.to_string(),
            })?;

        match row {
            Some(row) => {
                let stored: String = row.get(0);
                if stored != expected_checksum {
                    warn!(
                        "Checksum mismatch for migration {}: stored={}, expected={}",
                        name, stored, expected_checksum
                    );
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            None => Ok(false),
        }
    }
}

impl Default for MigrationHistory {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_checksum() {
        let content = "CREATE TABLE test (id INT);";
        let checksum = compute_checksum(content);
        assert_eq!(checksum.len(), 64); // SHA256 produces 64 hex characters

        // Same content, same checksum
        assert_eq!(checksum, compute_checksum(content));

        // Different content, different checksum
        assert_ne!(checksum, compute_checksum("CREATE TABLE other (id INT);"));
    }
}
