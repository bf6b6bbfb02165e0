//! Model descriptors consumed by the schema editor.
//!
//! These are the slice of ORM model metadata the engine needs: table name,
//! columns with their SQL types and constraints, and the app/model labels
//! used for tenant classification.

use serde::{Deserialize, Serialize};

/// A single column of a model's table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// SQL type as rendered into DDL, e.g. `TEXT`, `SERIAL`, `TIMESTAMPTZ`.
    pub sql_type: String,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<String>,
    /// Foreign key target as (table, column). Rendered as a deferred
    /// constraint so the referenced table need not exist yet.
    #[serde(default)]
    pub references: Option<(String, String)>,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some((table.to_string(), column.to_string()));
        self
    }
}

/// Descriptor of one model and its table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    /// Owning app label, e.g. `crm`.
    pub app_label: String,
    /// Model name within the app, e.g. `Person`.
    pub model_name: String,
    /// Table name, e.g. `crm_person`.
    pub table: String,
    pub columns: Vec<ColumnDef>,
    /// Groups of columns under a composite unique constraint.
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
    /// Groups of columns under a composite index.
    #[serde(default)]
    pub index_together: Vec<Vec<String>>,
}

impl ModelDef {
    pub fn new(app_label: &str, model_name: &str, table: &str) -> Self {
        Self {
            app_label: app_label.to_string(),
            model_name: model_name.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            unique_together: Vec::new(),
            index_together: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Qualified label, e.g. `crm.Person`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label() {
        let model = ModelDef::new("crm", "Person", "crm_person");
        assert_eq!(model.label(), "crm.Person");
    }

    #[test]
    fn test_column_builder() {
        let col = ColumnDef::new("owner_id", "INTEGER")
            .not_null()
            .references("crm_owner", "id");
        assert!(col.not_null);
        assert_eq!(
            col.references,
            Some(("crm_owner".to_string(), "id".to_string()))
        );
    }
}
