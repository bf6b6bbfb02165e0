//! Schema-scoped DDL: activation primitives, tenant classification and the
//! fan-out editor.

pub mod context;
pub mod ddl;
pub mod editor;
pub mod ident;
pub mod introspection;
pub mod model;
pub mod predicate;

pub use context::SchemaContext;
pub use editor::{DeferredLedger, SchemaScopedEditor, SessionState, StructuralOp, WrapState};
pub use model::{ColumnDef, ModelDef};
pub use predicate::TenantPredicate;
