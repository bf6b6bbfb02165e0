//! Connection pool construction.
//!
//! A migration run uses one logical session, so the pool exists mainly to
//! borrow a single connection with sane timeouts.

use crate::config::Config;
use crate::error::{EngineError, Result};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::NoTls;

pub fn create_pool(config: &Config) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(config.database_url.clone());

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: config.max_connections as usize,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(config.pool_timeout),
            create: Some(config.pool_timeout),
            recycle: Some(config.pool_timeout),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| EngineError::Internal(format!("Failed to create pool: {}", e)))
}
