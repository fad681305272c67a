use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use orchid_gateway::api;
use orchid_gateway::cli::{Cli, Command, RecordingsCommand};
use orchid_gateway::config::{Config, ConfigSeverity};
use orchid_gateway::state::AppState;
use orchid_store::{RecordingFilter, SignalStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = Config::load(cli.config.as_deref())?;

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            if let Some(path) = &config_path {
                tracing::info!(path = %path.display(), "config loaded");
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::Recordings { command }) => {
            let store = Arc::new(SignalStore::open(
                config.storage.data_dir.join("recordings"),
            )?);
            run_recordings(&store, command)
        }
        Some(Command::Version) => {
            println!("orchid {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orchid_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("orchid starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let bind = config.server.bind.clone();
    let state = AppState::new(config)?;
    let router = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn run_recordings(store: &Arc<SignalStore>, command: RecordingsCommand) -> anyhow::Result<()> {
    match command {
        RecordingsCommand::List { tag, provider_type } => {
            let filter = RecordingFilter {
                tag,
                provider_type,
                ..RecordingFilter::default()
            };
            for meta in store.list(Some(&filter)) {
                println!("{}", serde_json::to_string(&meta)?);
            }
            Ok(())
        }
        RecordingsCommand::Show { id } => match store.load(&id) {
            Ok(recording) => {
                println!("{}", serde_json::to_string_pretty(&recording)?);
                Ok(())
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        RecordingsCommand::Check { id } => match store.load(&id) {
            Ok(recording) => {
                let violations = orchid_store::check(&recording.signals);
                if violations.is_empty() {
                    println!("{id}: ok ({} signals)", recording.signals.len());
                    Ok(())
                } else {
                    for violation in &violations {
                        eprintln!("{id}: {violation}");
                    }
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        RecordingsCommand::Prune { keep } => match store.prune(keep) {
            Ok(pruned) => {
                println!("pruned {pruned} recording(s)");
                Ok(())
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        RecordingsCommand::Delete { id } => match store.delete(&id) {
            Ok(()) => {
                println!("deleted {id}");
                Ok(())
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
    }
}
