//! DDL statement rendering.
//!
//! Pure string building: every function turns a model or column descriptor
//! into SQL against the *unqualified* table name, so the same statement can
//! be replayed under any active search path. Statements that reference other
//! tables (foreign keys) are returned on the deferred list and only run once
//! the editor session closes.

use crate::schema::ident::quote_ident;
use crate::schema::model::{ColumnDef, ModelDef};

/// SQL produced for one structural operation.
#[derive(Debug, Default, Clone)]
pub struct Statements {
    pub immediate: Vec<String>,
    pub deferred: Vec<String>,
}

pub fn create_table(model: &ModelDef) -> Statements {
    let mut column_sql = Vec::new();
    let mut deferred = Vec::new();

    for column in &model.columns {
        column_sql.push(column_definition(column));
        if let Some(stmt) = foreign_key_constraint(&model.table, column) {
            deferred.push(stmt);
        }
    }

    for group in &model.unique_together {
        column_sql.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_ident(&constraint_name(&model.table, group, "uniq")),
            quote_columns(group)
        ));
    }

    let mut immediate = vec![format!(
        "CREATE TABLE {} ({})",
        quote_ident(&model.table),
        column_sql.join(", ")
    )];

    for group in &model.index_together {
        immediate.push(create_index(&model.table, group));
    }

    Statements { immediate, deferred }
}

pub fn drop_table(model: &ModelDef) -> Statements {
    Statements {
        immediate: vec![format!(
            "DROP TABLE {} CASCADE",
            quote_ident(&model.table)
        )],
        deferred: Vec::new(),
    }
}

pub fn add_column(model: &ModelDef, column: &ColumnDef) -> Statements {
    let mut deferred = Vec::new();
    if let Some(stmt) = foreign_key_constraint(&model.table, column) {
        deferred.push(stmt);
    }

    Statements {
        immediate: vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(&model.table),
            column_definition(column)
        )],
        deferred,
    }
}

pub fn remove_column(model: &ModelDef, column_name: &str) -> Statements {
    Statements {
        immediate: vec![format!(
            "ALTER TABLE {} DROP COLUMN {} CASCADE",
            quote_ident(&model.table),
            quote_ident(column_name)
        )],
        deferred: Vec::new(),
    }
}

/// Renders the ALTER COLUMN series to take `old` to `new`: type change with
/// a cast, then null-ness, then default.
pub fn alter_column(model: &ModelDef, old: &ColumnDef, new: &ColumnDef) -> Statements {
    let table = quote_ident(&model.table);
    let column = quote_ident(&new.name);
    let mut immediate = Vec::new();

    if old.sql_type != new.sql_type {
        immediate.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            table, column, new.sql_type, column, new.sql_type
        ));
    }

    if old.not_null != new.not_null {
        let action = if new.not_null { "SET" } else { "DROP" };
        immediate.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            table, column, action
        ));
    }

    if old.default != new.default {
        match &new.default {
            Some(default) => immediate.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                table, column, default
            )),
            None => immediate.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                table, column
            )),
        }
    }

    Statements {
        immediate,
        deferred: Vec::new(),
    }
}

pub fn rename_table(model: &ModelDef, new_table: &str) -> Statements {
    Statements {
        immediate: vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&model.table),
            quote_ident(new_table)
        )],
        deferred: Vec::new(),
    }
}

pub fn add_unique_constraint(table: &str, columns: &[String]) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        quote_ident(table),
        quote_ident(&constraint_name(table, columns, "uniq")),
        quote_columns(columns)
    )
}

pub fn drop_constraint(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(constraint)
    )
}

pub fn create_index(table: &str, columns: &[String]) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&constraint_name(table, columns, "idx")),
        quote_ident(table),
        quote_columns(columns)
    )
}

pub fn drop_index(index: &str) -> String {
    format!("DROP INDEX {}", quote_ident(index))
}

fn column_definition(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.sql_type);
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if column.not_null && !column.primary_key {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    sql
}

/// Foreign keys are created DEFERRABLE and after the rest of the batch, so
/// forward references between tables created in the same session work.
fn foreign_key_constraint(table: &str, column: &ColumnDef) -> Option<String> {
    let (ref_table, ref_column) = column.references.as_ref()?;
    let name = constraint_name(table, std::slice::from_ref(&column.name), "fk");
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
        quote_ident(table),
        quote_ident(&name),
        quote_ident(&column.name),
        quote_ident(ref_table),
        quote_ident(ref_column)
    ))
}

/// Deterministic constraint/index name, clipped to PostgreSQL's 63-byte
/// identifier limit with the suffix kept intact.
fn constraint_name(table: &str, columns: &[String], suffix: &str) -> String {
    let base = format!("{}_{}", table, columns.join("_"));
    let max_base = 63 - suffix.len() - 1;
    let clipped = if base.len() > max_base {
        &base[..max_base]
    } else {
        &base
    };
    format!("{}_{}", clipped, suffix)
}

fn quote_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ModelDef {
        ModelDef::new("crm", "Person", "crm_person")
            .column(ColumnDef::new("id", "SERIAL").primary_key())
            .column(ColumnDef::new("name", "TEXT").not_null())
            .column(
                ColumnDef::new("company_id", "INTEGER")
                    .not_null()
                    .references("crm_company", "id"),
            )
    }

    #[test]
    fn test_create_table_defers_foreign_keys() {
        let stmts = create_table(&person());

        assert_eq!(stmts.immediate.len(), 1);
        assert_eq!(
            stmts.immediate[0],
            "CREATE TABLE \"crm_person\" (\"id\" SERIAL PRIMARY KEY, \
             \"name\" TEXT NOT NULL, \"company_id\" INTEGER NOT NULL)"
        );

        assert_eq!(stmts.deferred.len(), 1);
        assert!(stmts.deferred[0].starts_with("ALTER TABLE \"crm_person\" ADD CONSTRAINT"));
        assert!(stmts.deferred[0].contains("REFERENCES \"crm_company\" (\"id\")"));
        assert!(stmts.deferred[0].ends_with("DEFERRABLE INITIALLY DEFERRED"));
    }

    #[test]
    fn test_create_table_unique_and_index_together() {
        let mut model = person();
        model.unique_together = vec![vec!["name".to_string(), "company_id".to_string()]];
        model.index_together = vec![vec!["name".to_string()]];

        let stmts = create_table(&model);
        assert!(stmts.immediate[0]
            .contains("CONSTRAINT \"crm_person_name_company_id_uniq\" UNIQUE (\"name\", \"company_id\")"));
        assert_eq!(
            stmts.immediate[1],
            "CREATE INDEX \"crm_person_name_idx\" ON \"crm_person\" (\"name\")"
        );
    }

    #[test]
    fn test_add_column_with_reference() {
        let model = person();
        let column = ColumnDef::new("owner_id", "INTEGER").references("crm_owner", "id");
        let stmts = add_column(&model, &column);

        assert_eq!(
            stmts.immediate,
            vec!["ALTER TABLE \"crm_person\" ADD COLUMN \"owner_id\" INTEGER".to_string()]
        );
        assert_eq!(stmts.deferred.len(), 1);
    }

    #[test]
    fn test_alter_column_type_null_default() {
        let model = person();
        let old = ColumnDef::new("name", "TEXT").not_null();
        let new = ColumnDef::new("name", "VARCHAR(128)").default_value("''");

        let stmts = alter_column(&model, &old, &new);
        assert_eq!(
            stmts.immediate,
            vec![
                "ALTER TABLE \"crm_person\" ALTER COLUMN \"name\" TYPE VARCHAR(128) USING \"name\"::VARCHAR(128)".to_string(),
                "ALTER TABLE \"crm_person\" ALTER COLUMN \"name\" DROP NOT NULL".to_string(),
                "ALTER TABLE \"crm_person\" ALTER COLUMN \"name\" SET DEFAULT ''".to_string(),
            ]
        );
    }

    #[test]
    fn test_constraint_name_clipped_to_identifier_limit() {
        let long = "t".repeat(80);
        let name = constraint_name(&long, &["col".to_string()], "uniq");
        assert!(name.len() <= 63);
        assert!(name.ends_with("_uniq"));
    }
}
