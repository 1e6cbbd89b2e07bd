use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pontis::config::{apply_env_overrides, Config};
use pontis::server::{run, AppState};

fn parse_flag(args: &[String], flag: &str) -> Option<PathBuf> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(PathBuf::from)
}

fn main() {
    pontis::logger::init_logger();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_flag(&args, "--config") {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("[E-CONFIG-LOAD] failed_to_load_config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(path) = parse_flag(&args, "--credentials") {
        // The supervisor hands the exported account file this way; it is the
        // same shared-mode path as `sharedAccountsFile` in the config.
        config.shared_accounts_file = Some(path);
    }

    apply_env_overrides(&mut config);
    if let Err(e) = config.validate() {
        error!("[E-CONFIG-INVALID] configuration_validation_failed: {}", e);
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let state = match AppState::new(config) {
            Ok(state) => state,
            Err(e) => {
                error!("[E-RUNTIME-STARTUP] {}", e);
                std::process::exit(1);
            }
        };

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        });

        if let Err(e) = run(state, cancel).await {
            error!("[E-RUNTIME-SERVE] {}", e);
            std::process::exit(1);
        }
    });
}
