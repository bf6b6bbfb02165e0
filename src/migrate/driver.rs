//! The apply-pending-migrations loop.
//!
//! Each migration runs inside its own transaction: editor session opened,
//! operations replayed forward, deferred SQL flushed on close, history row
//! recorded, commit. A failure rolls the transaction back and aborts the
//! whole run.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::migrate::history::MigrationHistory;
use crate::operations::Operation;
use crate::schema::editor::SchemaScopedEditor;
use tokio_postgres::Client;
use tracing::{debug, info};

/// One named migration: an ordered list of operations.
pub struct Migration {
    pub app_label: String,
    pub name: String,
    pub checksum: String,
    pub operations: Vec<Box<dyn Operation>>,
}

pub struct MigrationDriver {
    config: Config,
    verbosity: u8,
}

impl MigrationDriver {
    pub fn new(config: Config, verbosity: u8) -> Self {
        Self { config, verbosity }
    }

    /// Applies every migration not yet recorded in the history ledger, in
    /// the order given. Returns how many were applied.
    pub async fn apply_pending(
        &self,
        client: &mut Client,
        migrations: Vec<Migration>,
    ) -> Result<usize> {
        let history = MigrationHistory::new();
        history.ensure_table(&*client).await?;

        let applied = history.applied(&*client).await?;
        debug!(
            "{} applied migrations, {} candidates",
            applied.len(),
            migrations.len()
        );

        let mut count = 0;

        for migration in migrations {
            if applied.contains(&migration.name) {
                if !history
                    .verify_checksum(&*client, &migration.name, &migration.checksum)
                    .await?
                {
                    return Err(EngineError::MigrationFailed {
                        migration: migration.name.clone(),
                        cause: "content changed after it was applied (checksum mismatch)"
                            .to_string(),
                    });
                }
                debug!("Skipping already applied migration: {}", migration.name);
                continue;
            }

            info!("Applying migration: {}", migration.name);
            if self.verbosity >= 1 {
                print!("  Applying {}...", migration.name);
            }

            self.apply_one(client, &migration).await?;

            count += 1;
            if self.verbosity >= 1 {
                println!(" OK");
            }
        }

        Ok(count)
    }

    async fn apply_one(&self, client: &mut Client, migration: &Migration) -> Result<()> {
        let tx = client
            .transaction()
            .await
            .map_err(|e| EngineError::ConnectionFailed {
                cause: e.to_string(),
            })?;

        {
            let mut editor = SchemaScopedEditor::from_config(&tx, &self.config, self.verbosity);
            editor.open().await?;

            let mut failure: Option<EngineError> = None;
            for operation in &migration.operations {
                if let Err(e) = operation.forward(&migration.app_label, &mut editor).await {
                    failure = Some(e);
                    break;
                }
            }

            match failure {
                Some(e) => {
                    // Discards the deferred ledger; the transaction drop
                    // rolls the schema changes back.
                    editor.close(false).await.ok();
                    return Err(EngineError::MigrationFailed {
                        migration: migration.name.clone(),
                        cause: e.to_string(),
                    });
                }
                None => {
                    editor.close(true).await.map_err(|e| {
                        EngineError::MigrationFailed {
                            migration: migration.name.clone(),
                            cause: format!("deferred SQL failed: {}", e),
                        }
                    })?;
                }
            }
        }

        let history = MigrationHistory::new();
        history
            .record(&tx, &migration.name, &migration.checksum)
            .await?;

        tx.commit().await.map_err(|e| EngineError::MigrationFailed {
            migration: migration.name.clone(),
            cause: format!("commit failed: {}", e),
        })?;

        Ok(())
    }
}
