//! opsmigrate CLI - migrate Kubernetes resources and MySQL tables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use opsmigrate::api;
use opsmigrate::{
    CompareRequest, ConnectionRef, ConnectorCatalog, CreateTaskRequest, MigrateError,
    MigrationService, ResourceSelector, ServiceConfig, TaskStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "opsmigrate")]
#[command(about = "Migrate Kubernetes resources and MySQL tables between systems")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API until interrupted
    Serve {
        /// Override server.bind from the config
        #[arg(long)]
        bind: Option<String>,
    },

    /// Check that a configured connection is reachable
    TestConnection {
        /// Connection name from the config
        name: String,
    },

    /// List namespaces or databases of a connection
    Collections {
        /// Connection name from the config
        name: String,
    },

    /// List units inside a collection
    Units {
        /// Connection name from the config
        name: String,

        /// Namespace or database
        collection: String,

        /// Unit types to list (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,
    },

    /// Migrate units from one connection to another
    Migrate {
        /// Source connection name
        #[arg(long)]
        source: String,

        /// Target connection name
        #[arg(long)]
        target: String,

        /// Namespace or database to migrate from
        #[arg(long)]
        collection: String,

        /// Namespace or database on the target (default: same as source)
        #[arg(long)]
        target_collection: Option<String>,

        /// Migrate every unit of this type (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,

        /// Migrate this unit, `name` or `type/name` (repeatable)
        #[arg(long = "unit")]
        units: Vec<String>,

        /// Rows per batch (default: from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Do not create missing namespaces, databases or tables
        #[arg(long)]
        no_create_schema: bool,

        /// Empty or replace existing target units first
        #[arg(long)]
        truncate_target: bool,

        /// Copy structure only, no rows
        #[arg(long)]
        schema_only: bool,

        /// Resolve and print the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare unit counts between two connections
    Compare {
        /// Source connection name
        #[arg(long)]
        source: String,

        /// Target connection name
        #[arg(long)]
        target: String,

        /// Namespace or database to compare
        #[arg(long)]
        collection: String,

        /// Namespace or database on the target (default: same as source)
        #[arg(long)]
        target_collection: Option<String>,

        /// Unit to compare, `name` or `type/name` (repeatable)
        #[arg(long = "unit", required = true)]
        units: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = ServiceConfig::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // SIGINT and SIGTERM cancel running work
    let cancel_token = setup_signal_handler();

    let service =
        Arc::new(MigrationService::from_config(&config, ConnectorCatalog::with_builtins()).await?);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let addr: SocketAddr = bind.parse().map_err(|e| {
                MigrateError::Config(format!("invalid bind address '{}': {}", bind, e))
            })?;
            api::serve(service, addr, cancel_token).await?;
        }

        Commands::TestConnection { name } => {
            let result = service.test_connection(&ConnectionRef::Named(name.clone())).await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{}: {} ({})",
                    name,
                    if result.ok { "OK" } else { "FAILED" },
                    result.message
                );
            }
            if !result.ok {
                return Err(MigrateError::connection(name, result.message));
            }
        }

        Commands::Collections { name } => {
            let connection = service.named_connection(&name)?;
            let collections = service.list_collections(&connection).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&collections)?);
            } else {
                for c in collections {
                    println!("{}", c);
                }
            }
        }

        Commands::Units {
            name,
            collection,
            types,
        } => {
            let connection = service.named_connection(&name)?;
            let units = service.list_units(&connection, &collection, &types).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&units)?);
            } else {
                for u in units {
                    println!("{}/{}", u.unit_type, u.name);
                }
            }
        }

        Commands::Migrate {
            source,
            target,
            collection,
            target_collection,
            types,
            units,
            batch_size,
            no_create_schema,
            truncate_target,
            schema_only,
            dry_run,
        } => {
            let mut selector = ResourceSelector {
                collection,
                target_collection: None,
                unit_types: types,
                units,
            };
            if let Some(tc) = target_collection {
                selector = selector.with_target_collection(tc);
            }

            if dry_run {
                let source_config = service.named_connection(&source)?;
                let plan = service.plan(&source_config, &[selector]).await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Dry run: {} units would be migrated", plan.len());
                    for p in &plan {
                        println!("  {} -> {}", p.source, p.target);
                    }
                }
                return Ok(());
            }

            let mut request =
                CreateTaskRequest::new(source.as_str(), target.as_str(), vec![selector]);
            request.batch_size = batch_size;
            request.create_schema = Some(!no_create_schema);
            request.truncate_target = Some(truncate_target);
            request.only_sync_schema = schema_only;

            run_migration(&service, request, cancel_token, cli.output_json).await?;
        }

        Commands::Compare {
            source,
            target,
            collection,
            target_collection,
            units,
        } => {
            let request = CompareRequest {
                source_config: ConnectionRef::Named(source),
                target_config: ConnectionRef::Named(target),
                collection,
                target_collection,
                units,
            };
            let result = service.compare(request).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Comparison of {}:", result.collection);
                println!(
                    "  Units: source={}, target={} ({})",
                    result.source_count,
                    result.target_count,
                    if result.counts_equal { "equal" } else { "DIFFERENT" }
                );
                for u in &result.units {
                    println!(
                        "  {} {:<40} source={:<10} target={:<10}",
                        if u.divergent { "✗" } else { "✓" },
                        u.unit,
                        describe_count(u.exists_in_source, u.row_count_source),
                        describe_count(u.exists_in_target, u.row_count_target),
                    );
                }
            }
        }
    }

    Ok(())
}

/// Create and start a task, then follow it until it stops.
async fn run_migration(
    service: &MigrationService,
    request: CreateTaskRequest,
    cancel_token: CancellationToken,
    output_json: bool,
) -> Result<(), MigrateError> {
    let id = service.create_task(request).await?;
    service.start_task(&id).await?;
    info!("Started task {}", id);

    let mut last_progress = -1.0;
    let mut cancel_sent = false;
    loop {
        let progress = service.get_progress(&id).await?;
        if progress.status.is_terminal() {
            break;
        }
        if progress.progress > last_progress {
            last_progress = progress.progress;
            if !output_json {
                eprintln!(
                    "  {:>5.1}% ({}/{} units)",
                    progress.progress, progress.units_processed, progress.units_total
                );
            }
        }
        if cancel_token.is_cancelled() && !cancel_sent {
            warn!("Cancelling task {}", id);
            request_cancel(service, &id).await?;
            cancel_sent = true;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            _ = cancel_token.cancelled(), if !cancel_sent => {}
        }
    }

    let task = service.get_task(&id).await?;
    if output_json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        let summary = &task.summary;
        println!("\nMigration {}!", summary.status);
        println!("  Task ID: {}", summary.id);
        println!(
            "  Units: {}/{} succeeded",
            summary.units_succeeded, summary.units_total
        );
        println!("  Rows: {}", task.rows_migrated);
        for outcome in task.outcomes.iter().filter(|o| !o.success) {
            println!(
                "  Failed: {}: {}",
                outcome.unit,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    match task.summary.status {
        TaskStatus::Cancelled => Err(MigrateError::Cancelled),
        TaskStatus::Failed => Err(MigrateError::State(
            task.summary
                .error_message
                .unwrap_or_else(|| format!("task {} failed", id)),
        )),
        _ => Ok(()),
    }
}

/// Ask the service to stop a task. Returns false if it had already finished.
async fn request_cancel(service: &MigrationService, id: &str) -> Result<bool, MigrateError> {
    match service.cancel_task(id).await {
        Ok(_) => Ok(true),
        Err(MigrateError::InvalidState(reason)) => {
            info!("Task {} already finished: {}", id, reason);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn describe_count(exists: bool, count: u64) -> String {
    if exists {
        count.to_string()
    } else {
        "missing".to_string()
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Cannot install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Shutting down gracefully...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Windows only delivers Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
    });

    cancel_token
}
