//! File-based migration source.
//!
//! Migrations are plain `.sql` files in a directory, applied in filename
//! order (numeric prefixes like `001_`, `002_`). Each file may open with a
//! scope directive choosing the schema set it runs against:
//!
//! ```sql
//! -- scope: tenants
//! ALTER TABLE crm_person ADD COLUMN phone TEXT;
//! ```
//!
//! Recognized scopes: `public` (the default), `template`, `tenants`
//! (template plus every tenant schema) and `all` (public, template and every
//! tenant schema). Alternatively `-- schemas: a, b` names an explicit list.

use crate::error::{EngineError, Result};
use crate::migrate::driver::Migration;
use crate::migrate::history::compute_checksum;
use crate::operations::{RunInSchemas, RunSql, SchemaSelection};
use crate::schema::ident::is_valid_schema_name;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which schemas a migration file targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationScope {
    Public,
    Template,
    /// Template plus every registered tenant schema.
    Tenants,
    /// Public, template and every registered tenant schema.
    All,
    /// An explicit schema list.
    Schemas(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub name: String,
    pub path: PathBuf,
    pub sql: String,
    pub checksum: String,
    pub scope: MigrationScope,
}

impl MigrationFile {
    /// Builds the runnable migration: the file's SQL wrapped so it replays
    /// across the scoped schema set.
    pub fn into_migration(self) -> Migration {
        let sql = RunSql::new(&self.sql).describe_as(&self.name);
        let operation = match self.scope {
            MigrationScope::Public => RunInSchemas::run_in_public(Box::new(sql)),
            MigrationScope::Template => RunInSchemas::run_in_template(Box::new(sql)),
            MigrationScope::Tenants => {
                RunInSchemas::new(Box::new(sql), SchemaSelection::AllTenants, false, true)
            }
            MigrationScope::All => {
                RunInSchemas::new(Box::new(sql), SchemaSelection::AllTenants, true, true)
            }
            MigrationScope::Schemas(list) => {
                RunInSchemas::new(Box::new(sql), SchemaSelection::Listed(list), false, false)
            }
        };

        Migration {
            app_label: "sql".to_string(),
            name: self.name,
            checksum: self.checksum,
            operations: vec![Box::new(operation)],
        }
    }
}

/// Finds `.sql` migration files, sorted by filename.
pub fn find_migration_files(migrations_dir: &Path) -> Result<Vec<MigrationFile>> {
    if !migrations_dir.exists() {
        debug!(
            "Migrations directory {:?} does not exist, returning empty list",
            migrations_dir
        );
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in fs::read_dir(migrations_dir).map_err(|e| EngineError::Internal(format!(
        "Failed to read migrations directory: {}",
        e
    )))? {
        let entry = entry.map_err(|e| EngineError::Internal(format!(
            "Failed to read directory entry: {}",
            e
        )))?;

        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension() {
                if ext == "sql" {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("")
                        .to_string();

                    let content = fs::read_to_string(&path).map_err(|e| {
                        EngineError::MigrationFailed {
                            migration: name.clone(),
                            cause: format!("Failed to read file: {}", e),
                        }
                    })?;

                    let scope = parse_scope(&name, &content)?;
                    let checksum = compute_checksum(&content);

                    migrations.push(MigrationFile {
                        name,
                        path,
                        sql: content,
                        checksum,
                        scope,
                    });
                }
            }
        }
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(migrations)
}

/// Extracts the scope directive from a migration file. A file with no
/// directive runs in public only.
fn parse_scope(name: &str, content: &str) -> Result<MigrationScope> {
    let scope_re = regex::Regex::new(r"(?im)^\s*--\s*scope:\s*(\S+)\s*$").unwrap();
    let schemas_re = regex::Regex::new(r"(?im)^\s*--\s*schemas:\s*(.+?)\s*$").unwrap();

    if let Some(caps) = schemas_re.captures(content) {
        let schemas: Vec<String> = caps[1]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        for schema in &schemas {
            if !is_valid_schema_name(schema) {
                return Err(EngineError::MigrationFailed {
                    migration: name.to_string(),
                    cause: format!("invalid schema name in schemas directive: {}", schema),
                });
            }
        }

        return Ok(MigrationScope::Schemas(schemas));
    }

    match scope_re.captures(content) {
        None => Ok(MigrationScope::Public),
        Some(caps) => match caps[1].to_lowercase().as_str() {
            "public" => Ok(MigrationScope::Public),
            "template" => Ok(MigrationScope::Template),
            "tenants" => Ok(MigrationScope::Tenants),
            "all" => Ok(MigrationScope::All),
            other => Err(EngineError::MigrationFailed {
                migration: name.to_string(),
                cause: format!("unknown scope directive: {}", other),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_scope_directives() {
        assert_eq!(
            parse_scope("m.sql", "-- scope: tenants\nALTER TABLE t ADD COLUMN c TEXT;").unwrap(),
            MigrationScope::Tenants
        );
        assert_eq!(
            parse_scope("m.sql", "--scope: ALL\nSELECT 1;").unwrap(),
            MigrationScope::All
        );
        assert_eq!(
            parse_scope("m.sql", "-- a comment\nSELECT 1;").unwrap(),
            MigrationScope::Public
        );
        assert!(parse_scope("m.sql", "-- scope: everywhere\nSELECT 1;").is_err());
    }

    #[test]
    fn test_parse_explicit_schema_list() {
        let scope = parse_scope("m.sql", "-- schemas: good, acme-1\nINSERT INTO t VALUES (1);")
            .unwrap();
        assert_eq!(
            scope,
            MigrationScope::Schemas(vec!["good".to_string(), "acme-1".to_string()])
        );

        assert!(parse_scope("m.sql", "-- schemas: Bad\nSELECT 1;").is_err());
    }

    #[test]
    fn test_find_migration_files_sorted_by_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("002_add_phone.sql"),
            "-- scope: tenants\nALTER TABLE crm_person ADD COLUMN phone TEXT;",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("001_seed.sql"),
            "INSERT INTO settings VALUES ('a');",
        )
        .unwrap();
        fs::write(temp_dir.path().join("readme.md"), "docs").unwrap(); // ignored

        let files = find_migration_files(temp_dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "001_seed.sql");
        assert_eq!(files[0].scope, MigrationScope::Public);
        assert_eq!(files[1].name, "002_add_phone.sql");
        assert_eq!(files[1].scope, MigrationScope::Tenants);
        assert_eq!(files[0].checksum.len(), 64);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let files = find_migration_files(&temp_dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }
}
