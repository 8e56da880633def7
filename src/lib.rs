pub mod cli;
pub mod core;
pub mod store;

use crate::cli::load::LoadArgs;
use crate::cli::normalize::NormalizeArgs;
use crate::core::config::AppConfig;
use crate::core::normalize::Normalizer;
use anyhow::Result;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Normalize {
        input: PathBuf,
        output: PathBuf,
        workers: Option<usize>,
        single: bool,
    },
    Load {
        input: PathBuf,
        skip_list: Option<PathBuf>,
        skip_files: Vec<String>,
        workers: Option<usize>,
    },
    Compare {
        folder: PathBuf,
    },
}

/// Cancels the token on Ctrl-C. Running records finish, no new ones start.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for running records to finish");
            token.cancel();
        }
    });
    cancel
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fundsheet starting...");

    let config = AppConfig::load_or_default(config_path)?;
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Normalize {
            input,
            output,
            workers,
            single,
        } => {
            let args = NormalizeArgs {
                input,
                output,
                workers: workers.unwrap_or(config.workers),
                single,
            };
            let cancel = cancel_on_interrupt();
            cli::normalize::run(Normalizer::from_config(&config), args, &cancel).await
        }
        AppCommand::Load {
            input,
            skip_list,
            skip_files,
            workers,
        } => {
            let args = LoadArgs {
                input,
                skip_list,
                skip_files,
                workers: workers.unwrap_or(config.workers),
            };
            let store = store::open_store(&config)?;
            let cancel = cancel_on_interrupt();
            cli::load::run(store, args, &cancel).await
        }
        AppCommand::Compare { folder } => cli::compare::run(&folder),
    }
}
