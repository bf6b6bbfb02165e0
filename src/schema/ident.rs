//! Schema identifier validation.
//!
//! Tenant schema names are the only strings this crate ever interpolates into
//! SQL text (`SET search_path` and DDL cannot take bind parameters), so every
//! name passes through [`validate_schema_name`] before it reaches a statement.

use crate::config::SchemaNames;
use crate::error::{EngineError, Result};

/// May only contain lowercase letters, digits, underscores and dashes, and
/// must start with a letter. Capped at PostgreSQL's 63-byte identifier limit.
pub fn is_valid_schema_name(name: &str) -> bool {
    let re = regex::Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap();
    name.len() <= 63 && re.is_match(name)
}

/// Validates a schema name for use as an activation or DDL target. The two
/// reserved names are always accepted; anything else must pass the grammar.
pub fn validate_schema_name(names: &SchemaNames, schema: &str) -> Result<()> {
    if names.is_reserved(schema) || is_valid_schema_name(schema) {
        Ok(())
    } else {
        Err(EngineError::InvalidSchemaIdentifier {
            schema: schema.to_string(),
        })
    }
}

/// Validates a schema name for tenant creation: grammar plus not reserved.
pub fn validate_tenant_schema_name(names: &SchemaNames, schema: &str) -> Result<()> {
    if names.is_reserved(schema) {
        return Err(EngineError::ReservedIdentifier {
            schema: schema.to_string(),
        });
    }
    if !is_valid_schema_name(schema) {
        return Err(EngineError::InvalidSchemaIdentifier {
            schema: schema.to_string(),
        });
    }
    Ok(())
}

/// Double-quotes an identifier for interpolation into SQL text. Callers must
/// have validated the name first; the grammar excludes the quote character.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grammar() {
        assert!(is_valid_schema_name("acme"));
        assert!(is_valid_schema_name("acme-1"));
        assert!(is_valid_schema_name("a2_b-c"));

        assert!(!is_valid_schema_name("Acme")); // capital letter
        assert!(!is_valid_schema_name("1acme")); // starts with digit
        assert!(!is_valid_schema_name("-acme"));
        assert!(!is_valid_schema_name(""));
        assert!(!is_valid_schema_name("acme schema"));
        assert!(!is_valid_schema_name(&"a".repeat(64)));
    }

    #[test]
    fn test_reserved_names_activate_but_do_not_create() {
        let names = SchemaNames::default();

        // "__template__" fails the grammar but is a valid activation target.
        assert!(validate_schema_name(&names, "__template__").is_ok());
        assert!(validate_schema_name(&names, "public").is_ok());
        assert!(validate_schema_name(&names, "acme-1").is_ok());
        assert!(matches!(
            validate_schema_name(&names, "Acme"),
            Err(EngineError::InvalidSchemaIdentifier { .. })
        ));

        assert!(matches!(
            validate_tenant_schema_name(&names, "public"),
            Err(EngineError::ReservedIdentifier { .. })
        ));
        assert!(matches!(
            validate_tenant_schema_name(&names, "__template__"),
            Err(EngineError::ReservedIdentifier { .. })
        ));
        assert!(validate_tenant_schema_name(&names, "acme-1").is_ok());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("acme-1"), "\"acme-1\"");
    }
}
