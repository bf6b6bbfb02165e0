//! Schema activation primitives.
//!
//! The active schema is PostgreSQL session state (`search_path`), so these
//! functions are generic over [`GenericClient`] and must all run on the one
//! connection a migration run owns. [`SchemaContext`] wraps them with an
//! explicit active-schema handle for the editor session; the handle is plain
//! struct state, never a process global, so one context per connection is
//! enough to make parallel runs safe.

use crate::config::SchemaNames;
use crate::error::{EngineError, Result};
use crate::schema::ident::{quote_ident, validate_schema_name, validate_tenant_schema_name};
use tokio_postgres::{GenericClient, Transaction};
use tracing::debug;

const CLONE_SCHEMA_SQL: &str = include_str!("../../sql/clone_schema.sql");

/// Sets the session search path. Tenant schemas fall back to the public
/// schema for shared tables unless `exclude_public` is set; the public
/// schema itself is always activated alone.
pub async fn activate_schema<C>(
    client: &C,
    names: &SchemaNames,
    schema: &str,
    exclude_public: bool,
) -> Result<()>
where
    C: GenericClient + Sync,
{
    validate_schema_name(names, schema)?;

    let sql = if schema == names.public || exclude_public {
        format!("SET search_path TO {}", quote_ident(schema))
    } else {
        format!(
            "SET search_path TO {}, {}",
            quote_ident(schema),
            quote_ident(&names.public)
        )
    };

    client
        .execute(sql.as_str(), &[])
        .await
        .map_err(|e| EngineError::Sql {
            schema: schema.to_string(),
            operation: "SET search_path".to_string(),
            cause: e.to_string(),
        })?;

    Ok(())
}

pub async fn deactivate_schema<C>(client: &C, names: &SchemaNames) -> Result<()>
where
    C: GenericClient + Sync,
{
    activate_schema(client, names, &names.public, false).await
}

pub async fn schema_exists<C>(client: &C, schema: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_opt(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
            &[&schema],
        )
        .await?;
    Ok(row.is_some())
}

/// Invokes the server-side clone procedure copying every table, sequence,
/// index, constraint and default from `template` into a new schema.
pub async fn clone_schema<C>(client: &C, names: &SchemaNames, new_schema: &str) -> Result<()>
where
    C: GenericClient + Sync,
{
    validate_tenant_schema_name(names, new_schema)?;

    if schema_exists(client, new_schema).await? {
        return Err(EngineError::SchemaAlreadyExists {
            schema: new_schema.to_string(),
        });
    }

    client
        .execute(
            "SELECT clone_schema($1, $2)",
            &[&names.template, &new_schema],
        )
        .await
        .map_err(|e| EngineError::Sql {
            schema: new_schema.to_string(),
            operation: "clone_schema".to_string(),
            cause: e.to_string(),
        })?;

    debug!("Cloned schema {} from {}", new_schema, names.template);
    Ok(())
}

pub async fn current_schema<C>(client: &C) -> Result<String>
where
    C: GenericClient + Sync,
{
    let row = client.query_one("SELECT current_schema()", &[]).await?;
    let schema: Option<String> = row.get(0);
    Ok(schema.unwrap_or_default())
}

/// Creates a schema if it does not exist yet; used for template bootstrap.
pub async fn ensure_schema<C>(client: &C, names: &SchemaNames, schema: &str) -> Result<()>
where
    C: GenericClient + Sync,
{
    validate_schema_name(names, schema)?;

    let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
    client
        .execute(sql.as_str(), &[])
        .await
        .map_err(|e| EngineError::Sql {
            schema: schema.to_string(),
            operation: "CREATE SCHEMA".to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}

/// Installs the `clone_schema` stored function. `CREATE OR REPLACE`, so
/// re-running bootstrap against an already-provisioned database is safe.
pub async fn install_clone_procedure<C>(client: &C) -> Result<()>
where
    C: GenericClient + Sync,
{
    client
        .batch_execute(CLONE_SCHEMA_SQL)
        .await
        .map_err(|e| EngineError::Sql {
            schema: "public".to_string(),
            operation: "install clone_schema procedure".to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}

/// Per-session schema context: one transaction plus the handle recording
/// what the session is presently scoped to.
pub struct SchemaContext<'a> {
    tx: &'a Transaction<'a>,
    names: SchemaNames,
    /// Set once an explicit activation has been issued on the session.
    active: Option<(String, bool)>,
}

impl<'a> SchemaContext<'a> {
    /// A fresh context is scoped to the public schema.
    pub fn new(tx: &'a Transaction<'a>, names: SchemaNames) -> Self {
        Self {
            tx,
            names,
            active: None,
        }
    }

    pub fn names(&self) -> &SchemaNames {
        &self.names
    }

    pub fn transaction(&self) -> &'a Transaction<'a> {
        self.tx
    }

    /// The schema subsequent SQL will run against.
    pub fn active_schema(&self) -> &str {
        match &self.active {
            Some((schema, _)) => schema,
            None => &self.names.public,
        }
    }

    /// Idempotent: re-activating the schema the handle already records is a
    /// no-op.
    pub async fn activate(&mut self, schema: &str, exclude_public: bool) -> Result<()> {
        if let Some((active, exclusive)) = &self.active {
            if active == schema && *exclusive == exclude_public {
                return Ok(());
            }
        }
        activate_schema(self.tx, &self.names, schema, exclude_public).await?;
        self.active = Some((schema.to_string(), exclude_public));
        Ok(())
    }

    pub async fn deactivate(&mut self) -> Result<()> {
        let public = self.names.public.clone();
        self.activate(&public, false).await
    }

    pub async fn exists(&self, schema: &str) -> Result<bool> {
        schema_exists(self.tx, schema).await
    }

    pub async fn clone_from_template(&self, new_schema: &str) -> Result<()> {
        clone_schema(self.tx, &self.names, new_schema).await
    }

    /// What the database session itself reports; for diagnostics and tests.
    pub async fn current_schema(&self) -> Result<String> {
        current_schema(self.tx).await
    }

    /// Runs one statement against the active schema, attaching schema and
    /// operation context to any failure.
    pub async fn execute(&self, sql: &str, operation: &str) -> Result<u64> {
        self.tx
            .execute(sql, &[])
            .await
            .map_err(|e| EngineError::Sql {
                schema: self.active_schema().to_string(),
                operation: operation.to_string(),
                cause: e.to_string(),
            })
    }

    /// Runs a multi-statement script against the active schema.
    pub async fn batch_execute(&self, sql: &str, operation: &str) -> Result<()> {
        self.tx
            .batch_execute(sql)
            .await
            .map_err(|e| EngineError::Sql {
                schema: self.active_schema().to_string(),
                operation: operation.to_string(),
                cause: e.to_string(),
            })
    }
}
