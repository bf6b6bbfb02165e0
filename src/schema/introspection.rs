//! Catalog introspection scoped to the active schema.
//!
//! Constraint and index lookups run against `current_schema()`, so the same
//! query serves whichever schema the session has activated.

use crate::error::Result;
use std::collections::HashMap;
use tokio_postgres::GenericClient;

/// Everything known about one constraint or index on a table.
#[derive(Debug, Clone, Default)]
pub struct ConstraintInfo {
    pub columns: Vec<String>,
    pub primary_key: bool,
    pub unique: bool,
    pub foreign_key: Option<(String, String)>,
    pub check: bool,
    pub index: bool,
}

/// Optional conditions for [`constraint_names`]; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ConstraintFilter {
    pub unique: Option<bool>,
    pub primary_key: Option<bool>,
    pub index: Option<bool>,
    pub foreign_key: Option<bool>,
    pub check: Option<bool>,
}

pub async fn table_exists<C>(client: &C, schema: &str, table: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_opt(
            r#"
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = $1
            AND table_name = $2
            "#,
            &[&schema, &table],
        )
        .await?;
    Ok(row.is_some())
}

/// Retrieves constraints and keys (unique, pk, fk, check, index) across one
/// or more columns of `table` in the current schema.
pub async fn get_constraints<C>(
    client: &C,
    table: &str,
) -> Result<HashMap<String, ConstraintInfo>>
where
    C: GenericClient + Sync,
{
    let mut constraints: HashMap<String, ConstraintInfo> = HashMap::new();

    // PKs, FKs and uniques, but not CHECK
    let rows = client
        .query(
            r#"
            SELECT
                kc.constraint_name,
                kc.column_name,
                c.constraint_type,
                array(SELECT table_name::text || '.' || column_name::text
                      FROM information_schema.constraint_column_usage
                      WHERE constraint_name = kc.constraint_name)
            FROM information_schema.key_column_usage AS kc
            JOIN information_schema.table_constraints AS c ON
                kc.table_schema = c.table_schema AND
                kc.table_name = c.table_name AND
                kc.constraint_name = c.constraint_name
            WHERE
                kc.table_schema = current_schema() AND
                kc.table_name = $1
            ORDER BY kc.ordinal_position ASC
            "#,
            &[&table],
        )
        .await?;

    for row in rows {
        let name: String = row.get(0);
        let column: String = row.get(1);
        let kind: String = row.get(2);
        let used_cols: Vec<String> = row.get(3);

        let entry = constraints.entry(name).or_insert_with(|| {
            let kind = kind.to_lowercase();
            ConstraintInfo {
                primary_key: kind == "primary key",
                unique: kind == "primary key" || kind == "unique",
                foreign_key: if kind == "foreign key" {
                    used_cols.first().and_then(|c| {
                        c.split_once('.')
                            .map(|(t, col)| (t.to_string(), col.to_string()))
                    })
                } else {
                    None
                },
                ..Default::default()
            }
        });
        entry.columns.push(column);
    }

    // CHECK constraint columns
    let rows = client
        .query(
            r#"
            SELECT kc.constraint_name, kc.column_name
            FROM information_schema.constraint_column_usage AS kc
            JOIN information_schema.table_constraints AS c ON
                kc.table_schema = c.table_schema AND
                kc.table_name = c.table_name AND
                kc.constraint_name = c.constraint_name
            WHERE
                c.constraint_type = 'CHECK' AND
                kc.table_schema = current_schema() AND
                kc.table_name = $1
            "#,
            &[&table],
        )
        .await?;

    for row in rows {
        let name: String = row.get(0);
        let column: String = row.get(1);
        let entry = constraints.entry(name).or_insert_with(|| ConstraintInfo {
            check: true,
            ..Default::default()
        });
        entry.columns.push(column);
    }

    // Indexes
    let rows = client
        .query(
            r#"
            SELECT
                c2.relname,
                ARRAY(
                    SELECT (SELECT attname FROM pg_catalog.pg_attribute WHERE attnum = i AND attrelid = c.oid)
                    FROM unnest(idx.indkey) i
                ),
                idx.indisunique,
                idx.indisprimary
            FROM pg_catalog.pg_class c, pg_catalog.pg_class c2,
                pg_catalog.pg_index idx, pg_catalog.pg_namespace n
            WHERE c.oid = idx.indrelid
                AND idx.indexrelid = c2.oid
                AND n.oid = c.relnamespace
                AND n.nspname = current_schema()
                AND c.relname = $1
            "#,
            &[&table],
        )
        .await?;

    for row in rows {
        let name: String = row.get(0);
        let columns: Vec<Option<String>> = row.get(1);
        let unique: bool = row.get(2);
        let primary: bool = row.get(3);

        constraints.entry(name).or_insert_with(|| ConstraintInfo {
            columns: columns.into_iter().flatten().collect(),
            primary_key: primary,
            unique,
            index: true,
            ..Default::default()
        });
    }

    Ok(constraints)
}

/// Returns all constraint names on `table` matching the column list and
/// filter conditions.
pub async fn constraint_names<C>(
    client: &C,
    table: &str,
    columns: Option<&[String]>,
    filter: &ConstraintFilter,
) -> Result<Vec<String>>
where
    C: GenericClient + Sync,
{
    let constraints = get_constraints(client, table).await?;
    let mut result: Vec<String> = constraints
        .into_iter()
        .filter(|(_, info)| matches_filter(info, columns, filter))
        .map(|(name, _)| name)
        .collect();
    result.sort();
    Ok(result)
}

fn matches_filter(
    info: &ConstraintInfo,
    columns: Option<&[String]>,
    filter: &ConstraintFilter,
) -> bool {
    if let Some(columns) = columns {
        if info.columns != columns {
            return false;
        }
    }
    if let Some(unique) = filter.unique {
        if info.unique != unique {
            return false;
        }
    }
    if let Some(primary_key) = filter.primary_key {
        if info.primary_key != primary_key {
            return false;
        }
    }
    if let Some(index) = filter.index {
        if info.index != index {
            return false;
        }
    }
    if let Some(check) = filter.check {
        if info.check != check {
            return false;
        }
    }
    if let Some(foreign_key) = filter.foreign_key {
        if foreign_key && info.foreign_key.is_none() {
            return false;
        }
        if !foreign_key && info.foreign_key.is_some() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_on(columns: &[&str]) -> ConstraintInfo {
        ConstraintInfo {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_by_columns() {
        let info = unique_on(&["a", "b"]);
        let cols: Vec<String> = vec!["a".to_string(), "b".to_string()];

        assert!(matches_filter(&info, Some(&cols), &ConstraintFilter::default()));
        assert!(!matches_filter(
            &info,
            Some(&["a".to_string()]),
            &ConstraintFilter::default()
        ));
    }

    #[test]
    fn test_filter_by_kind() {
        let info = unique_on(&["a"]);
        let unique_only = ConstraintFilter {
            unique: Some(true),
            index: Some(false),
            ..Default::default()
        };
        assert!(matches_filter(&info, None, &unique_only));

        let index_only = ConstraintFilter {
            index: Some(true),
            ..Default::default()
        };
        assert!(!matches_filter(&info, None, &index_only));
    }

    #[test]
    fn test_filter_foreign_key() {
        let mut info = unique_on(&["a"]);
        let fk = ConstraintFilter {
            foreign_key: Some(true),
            ..Default::default()
        };
        assert!(!matches_filter(&info, None, &fk));

        info.foreign_key = Some(("other".to_string(), "id".to_string()));
        assert!(matches_filter(&info, None, &fk));
    }
}
