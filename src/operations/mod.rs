//! Migration operations.
//!
//! Every operation exposes forward/backward entry points against a
//! [`SchemaScopedEditor`]. Model-level operations go through the editor's
//! per-model classification; [`RunInSchemas`] is the escape hatch that
//! replays an arbitrary operation across an explicit schema set instead.

use crate::config::SchemaNames;
use crate::error::{EngineError, Result};
use crate::schema::editor::SchemaScopedEditor;
use crate::schema::model::{ColumnDef, ModelDef};
use async_trait::async_trait;
use std::io::{self, Write};

/// A forward/backward migration operation.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn forward(&self, app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()>;

    async fn backward(&self, app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()>;

    /// Human-readable description for progress output.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Creates a model's table.
pub struct CreateModel {
    pub model: ModelDef,
}

#[async_trait]
impl Operation for CreateModel {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.create_table(&self.model).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.drop_table(&self.model).await
    }

    fn describe(&self) -> String {
        format!("Create model {}", self.model.label())
    }
}

/// Drops a model's table.
pub struct DeleteModel {
    pub model: ModelDef,
}

#[async_trait]
impl Operation for DeleteModel {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.drop_table(&self.model).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.create_table(&self.model).await
    }

    fn describe(&self) -> String {
        format!("Delete model {}", self.model.label())
    }
}

/// Adds a column to a model's table.
pub struct AddField {
    pub model: ModelDef,
    pub column: ColumnDef,
}

#[async_trait]
impl Operation for AddField {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.add_column(&self.model, &self.column).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.remove_column(&self.model, &self.column.name).await
    }

    fn describe(&self) -> String {
        format!("Add field {} to {}", self.column.name, self.model.label())
    }
}

/// Removes a column; keeps the full definition so the operation reverses.
pub struct RemoveField {
    pub model: ModelDef,
    pub column: ColumnDef,
}

#[async_trait]
impl Operation for RemoveField {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.remove_column(&self.model, &self.column.name).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.add_column(&self.model, &self.column).await
    }

    fn describe(&self) -> String {
        format!(
            "Remove field {} from {}",
            self.column.name,
            self.model.label()
        )
    }
}

/// Alters a column in place.
pub struct AlterField {
    pub model: ModelDef,
    pub old: ColumnDef,
    pub new: ColumnDef,
}

#[async_trait]
impl Operation for AlterField {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.alter_column(&self.model, &self.old, &self.new).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.alter_column(&self.model, &self.new, &self.old).await
    }

    fn describe(&self) -> String {
        format!("Alter field {} on {}", self.new.name, self.model.label())
    }
}

/// Renames a model's table.
pub struct RenameTable {
    pub model: ModelDef,
    pub new_table: String,
}

#[async_trait]
impl Operation for RenameTable {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.rename_table(&self.model, &self.new_table).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        let mut renamed = self.model.clone();
        renamed.table = self.new_table.clone();
        editor.rename_table(&renamed, &self.model.table).await
    }

    fn describe(&self) -> String {
        format!("Rename table {} to {}", self.model.table, self.new_table)
    }
}

/// Replaces a model's composite unique constraints.
pub struct AlterUniqueTogether {
    pub model: ModelDef,
    pub old: Vec<Vec<String>>,
    pub new: Vec<Vec<String>>,
}

#[async_trait]
impl Operation for AlterUniqueTogether {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor
            .alter_unique_together(&self.model, &self.old, &self.new)
            .await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor
            .alter_unique_together(&self.model, &self.new, &self.old)
            .await
    }

    fn describe(&self) -> String {
        format!("Alter unique_together for {}", self.model.label())
    }
}

/// Replaces a model's composite indexes.
pub struct AlterIndexTogether {
    pub model: ModelDef,
    pub old: Vec<Vec<String>>,
    pub new: Vec<Vec<String>>,
}

#[async_trait]
impl Operation for AlterIndexTogether {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor
            .alter_index_together(&self.model, &self.old, &self.new)
            .await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor
            .alter_index_together(&self.model, &self.new, &self.old)
            .await
    }

    fn describe(&self) -> String {
        format!("Alter index_together for {}", self.model.label())
    }
}

/// Raw SQL against whatever schema is active when it runs.
pub struct RunSql {
    pub sql: String,
    pub reverse_sql: Option<String>,
    pub description: String,
}

impl RunSql {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            reverse_sql: None,
            description: "Raw SQL operation".to_string(),
        }
    }

    pub fn reversible(sql: &str, reverse_sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            reverse_sql: Some(reverse_sql.to_string()),
            description: "Raw SQL operation".to_string(),
        }
    }

    pub fn describe_as(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

#[async_trait]
impl Operation for RunSql {
    async fn forward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        editor.execute_batch(&self.sql).await
    }

    async fn backward(&self, _app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        match &self.reverse_sql {
            Some(sql) => editor.execute_batch(sql).await,
            None => Err(EngineError::Internal(format!(
                "{} is not reversible",
                self.describe()
            ))),
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// The schema set a [`RunInSchemas`] wrapper targets.
#[derive(Debug, Clone)]
pub enum SchemaSelection {
    /// Every registered tenant schema, inactive ones included.
    AllTenants,
    /// An explicit list, replayed in list order.
    Listed(Vec<String>),
}

/// Activation order for one wrapper run: public first when requested, then
/// template, then the selection in its own order.
fn activation_order(
    names: &SchemaNames,
    public: bool,
    template: bool,
    schemas: &[String],
) -> Vec<String> {
    let mut order = Vec::with_capacity(schemas.len() + 2);
    if public {
        order.push(names.public.clone());
    }
    if template {
        order.push(names.template.clone());
    }
    order.extend(schemas.iter().cloned());
    order
}

/// Replays a wrapped operation across an explicit schema set, bypassing
/// per-model tenant classification entirely.
pub struct RunInSchemas {
    operation: Box<dyn Operation>,
    schemas: SchemaSelection,
    public: bool,
    template: bool,
}

impl RunInSchemas {
    pub fn new(
        operation: Box<dyn Operation>,
        schemas: SchemaSelection,
        public: bool,
        template: bool,
    ) -> Self {
        Self {
            operation,
            schemas,
            public,
            template,
        }
    }

    /// Broadcast across every registered tenant schema.
    pub fn all_tenants(operation: Box<dyn Operation>) -> Self {
        Self::new(operation, SchemaSelection::AllTenants, false, false)
    }

    /// Runs the wrapped operation in the public schema only.
    pub fn run_in_public(operation: Box<dyn Operation>) -> Self {
        Self::new(operation, SchemaSelection::Listed(Vec::new()), true, false)
    }

    /// Runs the wrapped operation in the template schema only.
    pub fn run_in_template(operation: Box<dyn Operation>) -> Self {
        Self::new(operation, SchemaSelection::Listed(Vec::new()), false, true)
    }

    async fn run(
        &self,
        direction: Direction,
        app_label: &str,
        editor: &mut SchemaScopedEditor<'_>,
    ) -> Result<()> {
        if editor.verbosity() >= 1 {
            print!("\n    {:<42}", self.operation.describe());
            io::stdout().flush().ok();
        }

        let names = editor.context().names().clone();
        let selected = match &self.schemas {
            SchemaSelection::AllTenants => {
                editor
                    .registry()
                    .schema_names(editor.context().transaction())
                    .await?
            }
            SchemaSelection::Listed(list) => list.clone(),
        };

        for schema in activation_order(&names, self.public, self.template, &selected) {
            editor.activate_schema(&schema).await?;
            if editor.verbosity() >= 1 {
                print!(" {}", schema);
                io::stdout().flush().ok();
            }
            match direction {
                Direction::Forward => self.operation.forward(app_label, editor).await?,
                Direction::Backward => self.operation.backward(app_label, editor).await?,
            }
        }

        editor.deactivate_schema().await
    }
}

#[async_trait]
impl Operation for RunInSchemas {
    async fn forward(&self, app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        self.run(Direction::Forward, app_label, editor).await
    }

    async fn backward(&self, app_label: &str, editor: &mut SchemaScopedEditor<'_>) -> Result<()> {
        self.run(Direction::Backward, app_label, editor).await
    }

    fn describe(&self) -> String {
        self.operation.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_order_public_then_template_then_listed() {
        let names = SchemaNames::default();
        let schemas = vec!["a".to_string(), "b".to_string()];

        let order = activation_order(&names, true, false, &schemas);
        assert_eq!(order, ["public", "a", "b"]);
        assert_eq!(order.len(), 3);

        let order = activation_order(&names, true, true, &schemas);
        assert_eq!(order, ["public", "__template__", "a", "b"]);

        let order = activation_order(&names, false, false, &schemas);
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn test_activation_order_preserves_listed_order() {
        let names = SchemaNames::default();
        let schemas = vec!["zebra".to_string(), "acme".to_string()];
        assert_eq!(
            activation_order(&names, false, false, &schemas),
            ["zebra", "acme"]
        );
    }

    #[test]
    fn test_run_sql_without_reverse_is_irreversible() {
        let op = RunSql::new("INSERT INTO crm_person (name) VALUES ('x')");
        assert!(op.reverse_sql.is_none());

        let op = RunSql::reversible("CREATE VIEW v AS SELECT 1", "DROP VIEW v");
        assert!(op.reverse_sql.is_some());
    }

    #[test]
    fn test_describe_delegates_to_wrapped_operation() {
        let wrapped = RunInSchemas::all_tenants(Box::new(
            RunSql::new("SELECT 1").describe_as("Seed person rows"),
        ));
        assert_eq!(wrapped.describe(), "Seed person rows");
    }
}
