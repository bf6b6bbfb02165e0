//! Bulk initial sync.
//!
//! The fresh-install path: create the template schema, install the clone
//! procedure, create the tenant registry table in public, then create every
//! remaining model's table through the schema-scoped editor so each lands in
//! its home schema set. One editor session spans the whole pass, so deferred
//! SQL (late foreign keys) flushes once at the end, per schema. Every step
//! is idempotent; re-running against a synced database is a no-op.

use crate::config::Config;
use crate::error::Result;
use crate::registry::tenant::TenantRegistry;
use crate::schema::context::{ensure_schema, install_clone_procedure, schema_exists};
use crate::schema::editor::SchemaScopedEditor;
use crate::schema::introspection::table_exists;
use crate::schema::model::ModelDef;
use crate::schema::predicate::TenantPredicate;
use tokio_postgres::Transaction;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

/// True once the template schema exists; the cheap probe the CLI uses to
/// decide whether a database still needs bootstrapping.
pub async fn is_bootstrapped(tx: &Transaction<'_>, config: &Config) -> Result<bool> {
    schema_exists(tx, &config.schema_names.template).await
}

/// Creates the template schema, installs the clone procedure and creates the
/// tenant registry table. Safe to re-run.
pub async fn bootstrap(tx: &Transaction<'_>, config: &Config, verbosity: u8) -> Result<()> {
    if verbosity >= 1 {
        println!("  Creating template schema and clone procedure...");
    }

    ensure_schema(tx, &config.schema_names, &config.schema_names.template).await?;
    install_clone_procedure(tx).await?;

    let registry = TenantRegistry::new(&config.tenant_registry_table, config.schema_names.clone());
    registry.ensure_table(tx).await?;

    info!(
        "Bootstrap complete: template={}, registry table={}",
        config.schema_names.template, config.tenant_registry_table
    );
    Ok(())
}

/// Runs the full initial sync: bootstrap, then every model's table created
/// across the right schema set in the order supplied by the caller
/// (dependency order across apps).
pub async fn initial_sync(
    tx: &Transaction<'_>,
    config: &Config,
    models: &[ModelDef],
    verbosity: u8,
) -> Result<SyncReport> {
    bootstrap(tx, config, verbosity).await?;

    let predicate = TenantPredicate::new(config.tenant_scoped.clone());
    let registry_table = config.tenant_registry_table.clone();
    let names = config.schema_names.clone();

    let mut report = SyncReport::default();

    if verbosity >= 1 {
        println!("  Creating tables...");
    }

    let mut editor = SchemaScopedEditor::from_config(tx, config, verbosity);
    editor.open().await?;

    for model in models {
        // The registry table was created by bootstrap, in public only.
        if model.table == registry_table {
            report.skipped.push(model.label());
            continue;
        }

        // A model's home schema is where its table would already live:
        // template for tenant-scoped models, public for shared ones.
        let home_schema = if predicate.is_tenant_scoped(model) {
            &names.template
        } else {
            &names.public
        };

        if table_exists(tx, home_schema, &model.table).await? {
            debug!("Table {} already exists in {}, skipping", model.table, home_schema);
            report.skipped.push(model.label());
            continue;
        }

        if verbosity >= 3 {
            println!("    Processing {} model", model.label());
        }

        if let Err(e) = editor.create_table(model).await {
            editor.close(false).await.ok();
            return Err(e);
        }
        report.created.push(model.label());
    }

    if verbosity >= 1 && !editor.deferred().is_empty() {
        println!("\n    Running deferred SQL...");
    }
    editor.close(true).await?;

    info!(
        "Initial sync complete: {} created, {} skipped",
        report.created.len(),
        report.skipped.len()
    );

    Ok(report)
}
