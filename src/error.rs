use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid schema identifier: {schema}. Must match ^[a-z][a-z0-9_-]*$ and be at most 63 bytes.")]
    InvalidSchemaIdentifier { schema: String },

    #[error("Schema already exists: {schema}")]
    SchemaAlreadyExists { schema: String },

    #[error("Schema {schema} is reserved and not editable")]
    ReservedIdentifier { schema: String },

    #[error("Tenant schema identifier may not change after creation: {from} -> {to}")]
    ImmutableFieldChanged { from: String, to: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("SQL failed in schema {schema}: {operation} - {cause}")]
    Sql {
        schema: String,
        operation: String,
        cause: String,
    },

    #[error("Migration failed: {migration} - {cause}")]
    MigrationFailed { migration: String, cause: String },

    #[error("Connection failed: {cause}")]
    ConnectionFailed { cause: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for EngineError {
    fn from(err: tokio_postgres::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for EngineError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        EngineError::ConnectionFailed {
            cause: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(format!("IO error: {}", err))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
