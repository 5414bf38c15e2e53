//! db-scope - connectivity check.
//!
//! Registers the configured databases, opens all of them nested inside one
//! another through a single factory and reports each server version.

use clap::Parser;
use db_scope::config::Config;
use db_scope::db::{ConnectionFactory, ConnectionHandle, SqlxConnection};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Open every registered connection, each nested inside the previous one.
fn open_all<'f>(
    factory: &'f ConnectionFactory,
    handles: &mut Vec<ConnectionHandle<'f>>,
) -> Result<(), Box<dyn std::error::Error>> {
    for name in factory.registered_names() {
        let handle = factory.open(&name)?;
        let version = handle.downcast::<SqlxConnection>()?.server_version()?;
        info!(
            name = %name,
            physical_id = handle.physical_id(),
            depth = factory.scope_depth(),
            version = %version,
            "Connection ok"
        );
        println!("{name}: {version}");
        handles.push(handle);
    }
    Ok(())
}

fn check(factory: &ConnectionFactory) -> Result<(), Box<dyn std::error::Error>> {
    let mut handles = Vec::new();
    let opened = open_all(factory, &mut handles);

    // innermost first, also when opening failed part way
    let mut released = Ok(());
    while let Some(handle) = handles.pop() {
        if let Err(e) = handle.release() {
            released = released.and(Err(e));
        }
    }

    opened?;
    released?;
    factory.close_idle()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let factory_config = match config.factory_config() {
        Ok(factory_config) => factory_config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("Usage: db-scope --default <URL> [--database <name>=<URL>]...");
            eprintln!("       db-scope --config <PATH>");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  db-scope --default sqlite::memory:");
            eprintln!("  db-scope --default sqlite:app.db --database reports=postgres://u:p@host/reports");
            std::process::exit(2);
        }
    };

    info!(
        connections = factory_config.connections.len() + 1,
        auto_dispose = factory_config.auto_dispose,
        "Starting db-scope v{}",
        env!("CARGO_PKG_VERSION")
    );

    let factory = ConnectionFactory::from_config(&factory_config)?;
    if let Err(e) = check(&factory) {
        error!(error = %e, "Connectivity check failed");
        return Err(e);
    }

    info!("All connections ok");
    Ok(())
}
