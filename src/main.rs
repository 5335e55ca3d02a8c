//! Contact reconciler — service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Init logger once (CLI `-v` flags > env > config)
//!   5. Open the contact store
//!   6. Build the identity service
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run the HTTP channel until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use contact_reconciler::http::{HttpChannel, HttpState};
use contact_reconciler::{AppError, IdentityService, config, logger, store};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let (level, prefer_level) = logger::effective_level(args.log_level, &config.log_level);
    if let Some(log_file) = &config.log_file {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    logger::init(level, prefer_level, config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        data_dir = %config.data_dir.display(),
        backend = ?config.store.backend,
        effective_log_level = %level,
        "config loaded"
    );

    let contacts = store::open(&config.store)?;
    info!(backend = contacts.backend(), contacts = contacts.count()?, "contact store ready");

    let service = IdentityService::new(contacts, config.store.timeout);

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    if config.http.enabled {
        let state = HttpState {
            service_name: Arc::from(config.service_name.as_str()),
            service,
        };
        HttpChannel::new(config.http.bind.clone(), state)
            .run(shutdown)
            .await?;
    } else {
        info!("http channel disabled — waiting for shutdown");
        shutdown.cancelled().await;
    }

    info!("shutdown complete");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: contact-reconciler [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier:
    //   -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
