//! The schema-scoped DDL editor.
//!
//! Wraps structural operations so each one is replayed across every schema
//! where it is relevant: shared models execute once against the public
//! schema, tenant-scoped models fan out across the template schema and every
//! registered tenant. SQL that cannot run immediately (late foreign keys) is
//! collected per schema and replayed against that schema, and only that
//! schema, when the session closes successfully.

use crate::config::{Config, SchemaNames};
use crate::error::{EngineError, Result};
use crate::registry::tenant::TenantRegistry;
use crate::schema::context::SchemaContext;
use crate::schema::ddl::{self, Statements};
use crate::schema::introspection::{self, ConstraintFilter};
use crate::schema::model::{ColumnDef, ModelDef};
use crate::schema::predicate::TenantPredicate;
use std::collections::HashMap;
use std::io::{self, Write};
use tokio_postgres::Transaction;
use tracing::debug;

/// Re-entrancy guard: while the editor replays an operation inside the
/// per-schema loop, it is `Unwrapped` and the inner execution must not fan
/// out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapState {
    Wrapped,
    Unwrapped,
}

/// Session lifecycle for deferred-SQL bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Pending statements keyed by the schema that was active when they were
/// queued, in insertion order. Statements queued under schema X are only
/// ever replayed against X.
#[derive(Debug, Default)]
pub struct DeferredLedger {
    order: Vec<String>,
    entries: HashMap<String, Vec<String>>,
}

impl DeferredLedger {
    pub fn push(&mut self, schema: &str, statement: String) {
        if !self.entries.contains_key(schema) {
            self.order.push(schema.to_string());
        }
        self.entries
            .entry(schema.to_string())
            .or_default()
            .push(statement);
    }

    /// Removes and returns one schema's statements in enqueue order.
    pub fn take(&mut self, schema: &str) -> Vec<String> {
        self.order.retain(|s| s != schema);
        self.entries.remove(schema).unwrap_or_default()
    }

    /// Removes and returns everything, schemas in insertion order.
    pub fn drain(&mut self) -> Vec<(String, Vec<String>)> {
        let order = std::mem::take(&mut self.order);
        let mut entries = std::mem::take(&mut self.entries);
        order
            .into_iter()
            .map(|schema| {
                let stmts = entries.remove(&schema).unwrap_or_default();
                (schema, stmts)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn schemas(&self) -> &[String] {
        &self.order
    }
}

/// One structural operation against one model.
#[derive(Debug)]
pub enum StructuralOp<'m> {
    CreateTable(&'m ModelDef),
    DropTable(&'m ModelDef),
    AddColumn(&'m ModelDef, &'m ColumnDef),
    RemoveColumn(&'m ModelDef, &'m str),
    AlterColumn(&'m ModelDef, &'m ColumnDef, &'m ColumnDef),
    AlterUniqueTogether(&'m ModelDef, &'m [Vec<String>], &'m [Vec<String>]),
    AlterIndexTogether(&'m ModelDef, &'m [Vec<String>], &'m [Vec<String>]),
    RenameTable(&'m ModelDef, &'m str),
}

impl StructuralOp<'_> {
    pub fn model(&self) -> &ModelDef {
        match self {
            StructuralOp::CreateTable(m)
            | StructuralOp::DropTable(m)
            | StructuralOp::AddColumn(m, _)
            | StructuralOp::RemoveColumn(m, _)
            | StructuralOp::AlterColumn(m, _, _)
            | StructuralOp::AlterUniqueTogether(m, _, _)
            | StructuralOp::AlterIndexTogether(m, _, _)
            | StructuralOp::RenameTable(m, _) => m,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StructuralOp::CreateTable(_) => "create_table",
            StructuralOp::DropTable(_) => "drop_table",
            StructuralOp::AddColumn(_, _) => "add_column",
            StructuralOp::RemoveColumn(_, _) => "remove_column",
            StructuralOp::AlterColumn(_, _, _) => "alter_column",
            StructuralOp::AlterUniqueTogether(_, _, _) => "alter_unique",
            StructuralOp::AlterIndexTogether(_, _, _) => "alter_index",
            StructuralOp::RenameTable(_, _) => "rename_table",
        }
    }
}

/// Fan-out order for a tenant-scoped operation: template first, so later
/// clones inherit from it, then tenants in registry order.
fn fanout_order(template: &str, tenant_schemas: Vec<String>) -> Vec<String> {
    let mut schemas = Vec::with_capacity(tenant_schemas.len() + 1);
    schemas.push(template.to_string());
    schemas.extend(tenant_schemas);
    schemas
}

pub struct SchemaScopedEditor<'a> {
    ctx: SchemaContext<'a>,
    predicate: TenantPredicate,
    registry: TenantRegistry,
    ledger: DeferredLedger,
    wrap: WrapState,
    session: SessionState,
    verbosity: u8,
}

impl<'a> SchemaScopedEditor<'a> {
    pub fn new(
        tx: &'a Transaction<'a>,
        names: SchemaNames,
        predicate: TenantPredicate,
        registry: TenantRegistry,
        verbosity: u8,
    ) -> Self {
        Self {
            ctx: SchemaContext::new(tx, names),
            predicate,
            registry,
            ledger: DeferredLedger::default(),
            wrap: WrapState::Wrapped,
            session: SessionState::Closed,
            verbosity,
        }
    }

    pub fn from_config(tx: &'a Transaction<'a>, config: &Config, verbosity: u8) -> Self {
        Self::new(
            tx,
            config.schema_names.clone(),
            TenantPredicate::new(config.tenant_scoped.clone()),
            TenantRegistry::new(&config.tenant_registry_table, config.schema_names.clone()),
            verbosity,
        )
    }

    pub fn context(&self) -> &SchemaContext<'a> {
        &self.ctx
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn active_schema(&self) -> &str {
        self.ctx.active_schema()
    }

    pub fn deferred(&self) -> &DeferredLedger {
        &self.ledger
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Opens a scoped session: clears the ledger and scopes to public.
    pub async fn open(&mut self) -> Result<()> {
        self.ledger.clear();
        self.wrap = WrapState::Wrapped;
        self.session = SessionState::Open;
        self.ctx.deactivate().await
    }

    /// Closes the session. On success the deferred ledger is flushed: the
    /// public schema's statements run inline first, then each remaining
    /// schema is reactivated and its statements run in enqueue order. On
    /// failure the ledger is discarded so no partially-applied deferred DDL
    /// survives.
    pub async fn close(&mut self, success: bool) -> Result<()> {
        self.session = SessionState::Closed;

        if !success {
            self.ledger.clear();
            if let Err(e) = self.ctx.deactivate().await {
                debug!("Could not restore public search path on failed session: {}", e);
            }
            return Ok(());
        }

        let public = self.ctx.names().public.clone();
        let public_stmts = self.ledger.take(&public);
        if !public_stmts.is_empty() {
            self.ctx.activate(&public, false).await?;
            for sql in &public_stmts {
                self.ctx.execute(sql, "deferred sql").await?;
            }
        }

        for (schema, stmts) in self.ledger.drain() {
            self.ctx.activate(&schema, false).await?;
            for sql in &stmts {
                self.ctx.execute(sql, "deferred sql").await?;
            }
        }

        self.ctx.deactivate().await
    }

    pub async fn create_table(&mut self, model: &ModelDef) -> Result<()> {
        self.apply(StructuralOp::CreateTable(model)).await
    }

    pub async fn drop_table(&mut self, model: &ModelDef) -> Result<()> {
        self.apply(StructuralOp::DropTable(model)).await
    }

    pub async fn add_column(&mut self, model: &ModelDef, column: &ColumnDef) -> Result<()> {
        self.apply(StructuralOp::AddColumn(model, column)).await
    }

    pub async fn remove_column(&mut self, model: &ModelDef, column: &str) -> Result<()> {
        self.apply(StructuralOp::RemoveColumn(model, column)).await
    }

    pub async fn alter_column(
        &mut self,
        model: &ModelDef,
        old: &ColumnDef,
        new: &ColumnDef,
    ) -> Result<()> {
        self.apply(StructuralOp::AlterColumn(model, old, new)).await
    }

    pub async fn alter_unique_together(
        &mut self,
        model: &ModelDef,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<()> {
        self.apply(StructuralOp::AlterUniqueTogether(model, old, new))
            .await
    }

    pub async fn alter_index_together(
        &mut self,
        model: &ModelDef,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<()> {
        self.apply(StructuralOp::AlterIndexTogether(model, old, new))
            .await
    }

    pub async fn rename_table(&mut self, model: &ModelDef, new_table: &str) -> Result<()> {
        self.apply(StructuralOp::RenameTable(model, new_table)).await
    }

    /// Activates a schema for subsequent raw SQL; used by operation
    /// wrappers that manage their own schema set.
    pub async fn activate_schema(&mut self, schema: &str) -> Result<()> {
        self.ctx.activate(schema, false).await
    }

    pub async fn deactivate_schema(&mut self) -> Result<()> {
        self.ctx.deactivate().await
    }

    /// Runs one raw statement against the active schema.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.ctx.execute(sql, "raw sql").await
    }

    /// Runs a raw multi-statement script against the active schema.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.ctx.batch_execute(sql, "raw sql").await
    }

    async fn apply(&mut self, op: StructuralOp<'_>) -> Result<()> {
        if self.session != SessionState::Open {
            return Err(EngineError::Internal(
                "schema editor session is not open".to_string(),
            ));
        }

        // Inside the per-schema replay loop: execute directly, no second
        // fan-out.
        if self.wrap == WrapState::Unwrapped {
            return self.execute_op(&op).await;
        }

        let model = op.model();
        self.progress_header(op.name(), &model.label());

        let tenant_scoped =
            model.table != self.registry.table() && self.predicate.is_tenant_scoped(model);

        if !tenant_scoped {
            let public = self.ctx.names().public.clone();
            if self.ctx.active_schema() != public {
                self.ctx.activate(&public, false).await?;
            }
            self.progress_schema(&public);
            self.wrap = WrapState::Unwrapped;
            let result = self.execute_op(&op).await;
            self.wrap = WrapState::Wrapped;
            return result;
        }

        let template = self.ctx.names().template.clone();
        let tenants = self.registry.schema_names(self.ctx.transaction()).await?;
        let schemas = fanout_order(&template, tenants);

        for schema in &schemas {
            self.ctx.activate(schema, false).await?;
            self.progress_schema(schema);
            self.wrap = WrapState::Unwrapped;
            let result = self.execute_op(&op).await;
            self.wrap = WrapState::Wrapped;
            // fail fast: abort the remaining schemas and propagate
            result?;
        }

        self.ctx.deactivate().await
    }

    async fn execute_op(&mut self, op: &StructuralOp<'_>) -> Result<()> {
        let statements = match op {
            StructuralOp::CreateTable(model) => ddl::create_table(model),
            StructuralOp::DropTable(model) => ddl::drop_table(model),
            StructuralOp::AddColumn(model, column) => ddl::add_column(model, column),
            StructuralOp::RemoveColumn(model, column) => ddl::remove_column(model, column),
            StructuralOp::AlterColumn(model, old, new) => ddl::alter_column(model, old, new),
            StructuralOp::RenameTable(model, new_table) => ddl::rename_table(model, new_table),
            StructuralOp::AlterUniqueTogether(model, old, new) => {
                self.alter_unique_statements(model, old, new).await?
            }
            StructuralOp::AlterIndexTogether(model, old, new) => {
                self.alter_index_statements(model, old, new).await?
            }
        };

        for sql in &statements.immediate {
            debug!("Executing in {}: {}", self.ctx.active_schema(), sql);
            self.ctx.execute(sql, op.name()).await?;
        }
        for sql in statements.deferred {
            self.ledger.push(self.ctx.active_schema(), sql);
        }
        Ok(())
    }

    /// Dropped groups are resolved to their constraint name through the
    /// catalog of the active schema; added groups get deterministic names.
    async fn alter_unique_statements(
        &self,
        model: &ModelDef,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<Statements> {
        let mut statements = Statements::default();
        let tx = self.ctx.transaction();

        for group in old.iter().filter(|g| !new.contains(g)) {
            let names = introspection::constraint_names(
                tx,
                &model.table,
                Some(group),
                &ConstraintFilter {
                    unique: Some(true),
                    primary_key: Some(false),
                    index: Some(false),
                    ..Default::default()
                },
            )
            .await?;
            if names.len() != 1 {
                return Err(EngineError::Sql {
                    schema: self.ctx.active_schema().to_string(),
                    operation: "alter_unique".to_string(),
                    cause: format!(
                        "found {} unique constraints for {}({})",
                        names.len(),
                        model.table,
                        group.join(", ")
                    ),
                });
            }
            statements
                .immediate
                .push(ddl::drop_constraint(&model.table, &names[0]));
        }

        for group in new.iter().filter(|g| !old.contains(g)) {
            statements
                .immediate
                .push(ddl::add_unique_constraint(&model.table, group));
        }

        Ok(statements)
    }

    async fn alter_index_statements(
        &self,
        model: &ModelDef,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<Statements> {
        let mut statements = Statements::default();
        let tx = self.ctx.transaction();

        for group in old.iter().filter(|g| !new.contains(g)) {
            let names = introspection::constraint_names(
                tx,
                &model.table,
                Some(group),
                &ConstraintFilter {
                    index: Some(true),
                    unique: Some(false),
                    ..Default::default()
                },
            )
            .await?;
            if names.len() != 1 {
                return Err(EngineError::Sql {
                    schema: self.ctx.active_schema().to_string(),
                    operation: "alter_index".to_string(),
                    cause: format!(
                        "found {} indexes for {}({})",
                        names.len(),
                        model.table,
                        group.join(", ")
                    ),
                });
            }
            statements.immediate.push(ddl::drop_index(&names[0]));
        }

        for group in new.iter().filter(|g| !old.contains(g)) {
            statements
                .immediate
                .push(ddl::create_index(&model.table, group));
        }

        Ok(statements)
    }

    fn progress_header(&self, action: &str, label: &str) {
        if self.verbosity >= 1 {
            print!("\n    {:<16} {:<25}", action, label);
            io::stdout().flush().ok();
        }
    }

    fn progress_schema(&self, schema: &str) {
        if self.verbosity >= 1 {
            print!(" {}", schema);
            io::stdout().flush().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_keys_statements_by_schema() {
        let mut ledger = DeferredLedger::default();
        ledger.push("__template__", "ALTER TABLE a ADD CONSTRAINT fk1".to_string());
        ledger.push("acme", "ALTER TABLE a ADD CONSTRAINT fk1".to_string());
        ledger.push("__template__", "ALTER TABLE b ADD CONSTRAINT fk2".to_string());

        assert_eq!(ledger.schemas(), ["__template__", "acme"]);

        let template_stmts = ledger.take("__template__");
        assert_eq!(template_stmts.len(), 2);
        assert_eq!(template_stmts[0], "ALTER TABLE a ADD CONSTRAINT fk1");
        assert_eq!(template_stmts[1], "ALTER TABLE b ADD CONSTRAINT fk2");

        // acme's queue is untouched by the take above
        assert_eq!(ledger.take("acme").len(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_ledger_drain_preserves_insertion_order() {
        let mut ledger = DeferredLedger::default();
        ledger.push("b", "1".to_string());
        ledger.push("a", "2".to_string());
        ledger.push("b", "3".to_string());

        let drained = ledger.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, "b");
        assert_eq!(drained[0].1, ["1", "3"]);
        assert_eq!(drained[1].0, "a");
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_fanout_template_first_then_registry_order() {
        let schemas = fanout_order(
            "__template__",
            vec!["acme".to_string(), "zebra".to_string(), "beta".to_string()],
        );
        assert_eq!(schemas, ["__template__", "acme", "zebra", "beta"]);
    }

    #[test]
    fn test_fanout_with_no_tenants_still_hits_template() {
        assert_eq!(fanout_order("__template__", Vec::new()), ["__template__"]);
    }

    #[test]
    fn test_structural_op_accessors() {
        let model = ModelDef::new("crm", "Person", "crm_person");
        let op = StructuralOp::CreateTable(&model);
        assert_eq!(op.name(), "create_table");
        assert_eq!(op.model().label(), "crm.Person");
    }
}
