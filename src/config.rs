use crate::error::{EngineError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PUBLIC_SCHEMA: &str = "public";
pub const DEFAULT_TEMPLATE_SCHEMA: &str = "__template__";

/// The pair of reserved schema names the engine operates around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    pub public: String,
    pub template: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            public: DEFAULT_PUBLIC_SCHEMA.to_string(),
            template: DEFAULT_TEMPLATE_SCHEMA.to_string(),
        }
    }
}

impl SchemaNames {
    pub fn is_reserved(&self, schema: &str) -> bool {
        schema == self.public || schema == self.template
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub schema_names: SchemaNames,
    /// Name of the table backing the tenant registry. Required.
    pub tenant_registry_table: String,
    /// App or `app.Model` labels classified as tenant-scoped.
    pub tenant_scoped: Vec<String>,
    pub migrations_dir: PathBuf,
    pub max_connections: u32,
    pub pool_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Build database_url from individual fields or use DATABASE_URL if provided
        let database_url = if let Ok(url) = env::var("DATABASE_URL") {
            url
        } else {
            let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let db_name = env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
            let db_user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
            let db_password = env::var("DB_PASSWORD").unwrap_or_else(|_| "password".to_string());

            // URL-encode password to handle special characters
            let encoded_password = urlencoding::encode(&db_password);

            format!(
                "postgres://{}:{}@{}:{}/{}",
                db_user, encoded_password, db_host, db_port, db_name
            )
        };

        let schema_names = SchemaNames {
            public: env::var("PUBLIC_SCHEMA").unwrap_or_else(|_| DEFAULT_PUBLIC_SCHEMA.to_string()),
            template: env::var("TEMPLATE_SCHEMA")
                .unwrap_or_else(|_| DEFAULT_TEMPLATE_SCHEMA.to_string()),
        };

        if schema_names.public == schema_names.template {
            return Err(EngineError::ConfigurationError {
                message: "PUBLIC_SCHEMA and TEMPLATE_SCHEMA must differ".to_string(),
            });
        }

        // The registry table is the one setting with no sensible default:
        // without it the engine cannot enumerate tenant schemas.
        let tenant_registry_table =
            env::var("TENANT_REGISTRY_TABLE").map_err(|_| EngineError::ConfigurationError {
                message: "TENANT_REGISTRY_TABLE must be set to the tenant registry table name"
                    .to_string(),
            })?;

        if !is_valid_table_name(&tenant_registry_table) {
            return Err(EngineError::ConfigurationError {
                message: format!(
                    "TENANT_REGISTRY_TABLE '{}' is not a valid table name",
                    tenant_registry_table
                ),
            });
        }

        let tenant_scoped = env::var("TENANT_SCOPED")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let migrations_dir = env::var("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./migrations"));

        let max_connections = env::var("MAX_CONNECTIONS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        let pool_timeout_secs: u64 = env::var("POOL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        Ok(Config {
            database_url,
            schema_names,
            tenant_registry_table,
            tenant_scoped,
            migrations_dir,
            max_connections,
            pool_timeout: Duration::from_secs(pool_timeout_secs),
        })
    }
}

/// Table names are plain SQL identifiers: lowercase, digits and underscores,
/// not starting with a digit.
fn is_valid_table_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }

    let first_char = name.chars().next().unwrap();
    if !first_char.is_ascii_lowercase() && first_char != '_' {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_name() {
        assert!(is_valid_table_name("tenants"));
        assert!(is_valid_table_name("crm_tenant_schema"));
        assert!(is_valid_table_name("_registry"));

        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("1tenants"));
        assert!(!is_valid_table_name("Tenants"));
        assert!(!is_valid_table_name("drop table"));
    }

    #[test]
    fn test_reserved_names() {
        let names = SchemaNames::default();
        assert!(names.is_reserved("public"));
        assert!(names.is_reserved("__template__"));
        assert!(!names.is_reserved("acme"));
    }
}
