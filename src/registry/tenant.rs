//! The persisted catalog of tenant schemas.
//!
//! One row per tenant schema. Creating a row clones the template schema
//! first, so a committed row always has a real schema behind it. Rows are
//! never hard-deleted; deletion flips `is_active`.

use crate::config::SchemaNames;
use crate::error::{EngineError, Result};
use crate::schema::context::{activate_schema, clone_schema};
use crate::schema::ident::{quote_ident, validate_tenant_schema_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::{GenericClient, Row};
use tracing::info;

/// One tenant schema record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSchema {
    schema: String,
    pub display_name: String,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    persisted: bool,
    #[serde(skip)]
    initial_schema: String,
}

impl TenantSchema {
    pub fn new(schema: &str, display_name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            display_name: display_name.to_string(),
            is_active: true,
            created_at: None,
            persisted: false,
            initial_schema: schema.to_string(),
        }
    }

    /// The internal schema name. May not be changed after creation.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Changes the intended schema name. Rejected by
    /// [`TenantRegistry::save`] once the record is persisted.
    pub fn set_schema(&mut self, schema: &str) {
        self.schema = schema.to_string();
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn from_row(row: &Row) -> Self {
        let schema: String = row.get(0);
        Self {
            initial_schema: schema.clone(),
            schema,
            display_name: row.get(1),
            is_active: row.get(2),
            created_at: Some(row.get(3)),
            persisted: true,
        }
    }
}

/// Pre-flight checks shared by save paths; all run before any DDL.
fn validate_save(names: &SchemaNames, tenant: &TenantSchema) -> Result<()> {
    if names.is_reserved(tenant.schema()) {
        return Err(EngineError::ReservedIdentifier {
            schema: tenant.schema().to_string(),
        });
    }
    validate_tenant_schema_name(names, tenant.schema())?;
    if tenant.persisted && tenant.schema != tenant.initial_schema {
        return Err(EngineError::ImmutableFieldChanged {
            from: tenant.initial_schema.clone(),
            to: tenant.schema.clone(),
        });
    }
    Ok(())
}

/// Data access for the tenant registry table.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    table: String,
    names: SchemaNames,
}

impl TenantRegistry {
    pub fn new(table: &str, names: SchemaNames) -> Self {
        Self {
            table: table.to_string(),
            names,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the registry table in the public schema. The one table this
    /// engine owns outright; it is exempt from tenant classification.
    pub async fn ensure_table<C>(&self, client: &C) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                schema TEXT PRIMARY KEY,
                display_name TEXT NOT NULL UNIQUE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            quote_ident(&self.table)
        );

        client
            .batch_execute(&sql)
            .await
            .map_err(|e| EngineError::Sql {
                schema: self.names.public.clone(),
                operation: format!("create registry table {}", self.table),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// Persists a tenant record. First save clones the template schema into
    /// the tenant's schema before the row is inserted, so the two commit or
    /// roll back together with the caller's transaction.
    pub async fn save<C>(&self, client: &C, tenant: &mut TenantSchema) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        validate_save(&self.names, tenant)?;

        if !tenant.persisted {
            clone_schema(client, &self.names, tenant.schema()).await?;

            let sql = format!(
                "INSERT INTO {} (schema, display_name, is_active) VALUES ($1, $2, $3) RETURNING created_at",
                quote_ident(&self.table)
            );
            let row = client
                .query_one(sql.as_str(), &[&tenant.schema, &tenant.display_name, &tenant.is_active])
                .await
                .map_err(|e| EngineError::Sql {
                    schema: self.names.public.clone(),
                    operation: format!("insert tenant {}", tenant.schema),
                    cause: e.to_string(),
                })?;

            tenant.created_at = Some(row.get(0));
            tenant.persisted = true;
            tenant.initial_schema = tenant.schema.clone();
            info!("Created tenant schema: {}", tenant.schema);
        } else {
            let sql = format!(
                "UPDATE {} SET display_name = $2, is_active = $3 WHERE schema = $1",
                quote_ident(&self.table)
            );
            client
                .execute(sql.as_str(), &[&tenant.schema, &tenant.display_name, &tenant.is_active])
                .await
                .map_err(|e| EngineError::Sql {
                    schema: self.names.public.clone(),
                    operation: format!("update tenant {}", tenant.schema),
                    cause: e.to_string(),
                })?;
        }

        Ok(())
    }

    /// Logical deletion: flips `is_active` instead of dropping the schema.
    pub async fn soft_delete<C>(&self, client: &C, tenant: &mut TenantSchema) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        tenant.is_active = false;
        self.save(client, tenant).await?;
        info!("Deactivated tenant schema: {}", tenant.schema);
        Ok(())
    }

    pub async fn get<C>(&self, client: &C, schema: &str) -> Result<Option<TenantSchema>>
    where
        C: GenericClient + Sync,
    {
        let sql = format!(
            "SELECT schema, display_name, is_active, created_at FROM {} WHERE schema = $1",
            quote_ident(&self.table)
        );
        let row = client.query_opt(sql.as_str(), &[&schema]).await?;
        Ok(row.as_ref().map(TenantSchema::from_row))
    }

    /// Every registered tenant, active or not, in insertion order.
    pub async fn all<C>(&self, client: &C) -> Result<Vec<TenantSchema>>
    where
        C: GenericClient + Sync,
    {
        self.query_tenants(client, None).await
    }

    pub async fn active<C>(&self, client: &C) -> Result<Vec<TenantSchema>>
    where
        C: GenericClient + Sync,
    {
        self.query_tenants(client, Some(true)).await
    }

    pub async fn inactive<C>(&self, client: &C) -> Result<Vec<TenantSchema>>
    where
        C: GenericClient + Sync,
    {
        self.query_tenants(client, Some(false)).await
    }

    /// Schema names of every registered tenant, in insertion order; the
    /// enumeration backing broadcast fan-out.
    pub async fn schema_names<C>(&self, client: &C) -> Result<Vec<String>>
    where
        C: GenericClient + Sync,
    {
        Ok(self
            .all(client)
            .await?
            .into_iter()
            .map(|t| t.schema)
            .collect())
    }

    /// Activates a tenant's schema on the session.
    pub async fn activate<C>(&self, client: &C, tenant: &TenantSchema) -> Result<()>
    where
        C: GenericClient + Sync,
    {
        activate_schema(client, &self.names, tenant.schema(), false).await
    }

    async fn query_tenants<C>(
        &self,
        client: &C,
        is_active: Option<bool>,
    ) -> Result<Vec<TenantSchema>>
    where
        C: GenericClient + Sync,
    {
        let mut sql = format!(
            "SELECT schema, display_name, is_active, created_at FROM {}",
            quote_ident(&self.table)
        );
        let rows = match is_active {
            Some(flag) => {
                sql.push_str(" WHERE is_active = $1 ORDER BY created_at, schema");
                client.query(sql.as_str(), &[&flag]).await?
            }
            None => {
                sql.push_str(" ORDER BY created_at, schema");
                client.query(sql.as_str(), &[]).await?
            }
        };
        Ok(rows.iter().map(TenantSchema::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tenant_defaults() {
        let tenant = TenantSchema::new("acme", "Acme Corp");
        assert_eq!(tenant.schema(), "acme");
        assert!(tenant.is_active);
        assert!(!tenant.is_persisted());
        assert!(tenant.created_at.is_none());
    }

    #[test]
    fn test_save_rejects_reserved_names() {
        let names = SchemaNames::default();
        for reserved in ["public", "__template__"] {
            let tenant = TenantSchema::new(reserved, "nope");
            assert!(matches!(
                validate_save(&names, &tenant),
                Err(EngineError::ReservedIdentifier { .. })
            ));
        }
    }

    #[test]
    fn test_save_rejects_bad_grammar_before_any_ddl() {
        let names = SchemaNames::default();
        for bad in ["Acme", "1acme", "", "acme corp"] {
            let tenant = TenantSchema::new(bad, "bad");
            assert!(matches!(
                validate_save(&names, &tenant),
                Err(EngineError::InvalidSchemaIdentifier { .. })
            ));
        }
        let good = TenantSchema::new("acme-1", "good");
        assert!(validate_save(&names, &good).is_ok());
    }

    #[test]
    fn test_schema_id_immutable_once_persisted() {
        let names = SchemaNames::default();
        let mut tenant = TenantSchema::new("acme", "Acme Corp");
        // simulate a loaded row
        tenant.persisted = true;
        tenant.initial_schema = "acme".to_string();

        tenant.set_schema("acme-renamed");
        assert!(matches!(
            validate_save(&names, &tenant),
            Err(EngineError::ImmutableFieldChanged { .. })
        ));

        tenant.set_schema("acme");
        assert!(validate_save(&names, &tenant).is_ok());
    }
}
