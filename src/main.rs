//! Apply pending migrations across all tenant schemas.
//!
//! Usage:
//!   pgtenants-migrate [--verbosity N] [--migrations-dir PATH]
//!   pgtenants-migrate --initial-sync [--models PATH]
//!
//! Exit code 0 on success, 1 on any unhandled error.

use pgtenants::config::Config;
use pgtenants::error::{EngineError, Result};
use pgtenants::migrate::{
    bootstrap, find_migration_files, initial_sync, is_bootstrapped, MigrationDriver,
};
use pgtenants::pool::create_pool;
use pgtenants::schema::ModelDef;

use std::env;
use std::path::PathBuf;
use std::process;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct CliArgs {
    verbosity: u8,
    migrations_dir: Option<PathBuf>,
    initial_sync: bool,
    models_file: Option<PathBuf>,
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} [--verbosity N] [--migrations-dir PATH] [--initial-sync [--models PATH]]",
        program
    );
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --verbosity N        Progress output level, 0-3 (default 1)");
    eprintln!("  --migrations-dir P   Override MIGRATIONS_DIR");
    eprintln!("  --initial-sync       Bootstrap the template schema, clone procedure and");
    eprintln!("                       tenant registry, then create model tables and exit");
    eprintln!("  --models P           JSON file of model definitions for --initial-sync,");
    eprintln!("                       in dependency order");
    process::exit(1);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut parsed = CliArgs {
        verbosity: 1,
        migrations_dir: None,
        initial_sync: false,
        models_file: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--verbosity" => {
                i += 1;
                let value = args.get(i).unwrap_or_else(|| usage(&program));
                parsed.verbosity = value.parse().unwrap_or_else(|_| usage(&program));
            }
            "--migrations-dir" => {
                i += 1;
                let value = args.get(i).unwrap_or_else(|| usage(&program));
                parsed.migrations_dir = Some(PathBuf::from(value));
            }
            "--models" => {
                i += 1;
                let value = args.get(i).unwrap_or_else(|| usage(&program));
                parsed.models_file = Some(PathBuf::from(value));
            }
            "--initial-sync" => parsed.initial_sync = true,
            "--help" | "-h" => usage(&program),
            other => {
                eprintln!("Unknown argument: {}", other);
                usage(&program);
            }
        }
        i += 1;
    }

    if parsed.models_file.is_some() && !parsed.initial_sync {
        eprintln!("--models only makes sense with --initial-sync");
        usage(&program);
    }

    parsed
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pgtenants=debug")),
    );

    // File output is opt-in for a CLI; set LOG_DIR to keep an audit trail of
    // migration runs.
    if let Ok(log_dir) = env::var("LOG_DIR") {
        std::fs::create_dir_all(&log_dir).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create log directory {}: {}", log_dir, e);
        });
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &log_dir, "pgtenants-migrate.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        registry
            .with(fmt::layer().with_target(true))
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(non_blocking),
            )
            .init();
        Some(guard)
    } else {
        registry.with(fmt::layer().with_target(true)).init();
        None
    }
}

fn load_models(path: &PathBuf) -> Result<Vec<ModelDef>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| EngineError::ConfigurationError {
        message: format!("invalid models file {:?}: {}", path, e),
    })
}

async fn run(args: CliArgs) -> Result<usize> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &args.migrations_dir {
        config.migrations_dir = dir.clone();
    }

    let pool = create_pool(&config)?;
    let mut client_handle = pool.get().await?;
    let client: &mut tokio_postgres::Client = &mut **client_handle;

    if args.initial_sync {
        let models = match &args.models_file {
            Some(path) => load_models(path)?,
            None => Vec::new(),
        };

        let tx = client.transaction().await?;
        let report = initial_sync(&tx, &config, &models, args.verbosity).await?;
        tx.commit().await?;

        info!(
            "Initial sync complete: {} table(s) created, {} skipped",
            report.created.len(),
            report.skipped.len()
        );
        return Ok(0);
    }

    // Bootstrap a fresh database before touching migrations.
    let tx = client.transaction().await?;
    if !is_bootstrapped(&tx, &config).await? {
        bootstrap(&tx, &config, args.verbosity).await?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    let files = find_migration_files(&config.migrations_dir)?;
    if files.is_empty() {
        warn!("No migration files found in {:?}", config.migrations_dir);
        return Ok(0);
    }

    let migrations = files.into_iter().map(|f| f.into_migration()).collect();

    let driver = MigrationDriver::new(config, args.verbosity);
    driver.apply_pending(client, migrations).await
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let _guard = init_logging();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    match run(args).await {
        Ok(applied) => {
            info!("Applied {} migration(s)", applied);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
