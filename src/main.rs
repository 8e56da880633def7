use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fundsheet::core::log::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fundsheet::AppCommand {
    fn from(cmd: Commands) -> fundsheet::AppCommand {
        match cmd {
            Commands::Normalize {
                input,
                output,
                workers,
                single,
            } => fundsheet::AppCommand::Normalize {
                input,
                output,
                workers,
                single,
            },
            Commands::Load {
                input,
                skip_list,
                skip_files,
                workers,
            } => fundsheet::AppCommand::Load {
                input,
                skip_list,
                skip_files,
                workers,
            },
            Commands::Compare { folder } => fundsheet::AppCommand::Compare { folder },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Normalize extracted fact sheets into `_transformed.json` files
    Normalize {
        /// Folder of extracted JSON files, or one file with --single
        #[arg(short, long)]
        input: PathBuf,
        /// Folder for the normalized files
        #[arg(short, long)]
        output: PathBuf,
        /// Number of files processed at once
        #[arg(short, long)]
        workers: Option<usize>,
        /// Treat --input as a single file
        #[arg(long)]
        single: bool,
    },
    /// Reconcile normalized files against the fund store
    Load {
        /// Folder of `_transformed.json` files, or one such file
        #[arg(short, long)]
        input: PathBuf,
        /// File listing base names to leave out
        #[arg(long)]
        skip_list: Option<PathBuf>,
        /// Comma-separated base names to leave out
        #[arg(long, value_delimiter = ',')]
        skip_files: Vec<String>,
        /// Number of files processed at once
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Compare normalized files with their `_PRUEBA` references
    Compare {
        /// Folder holding both sets of files
        folder: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => fundsheet::cli::setup::setup(),
        Some(cmd) => fundsheet::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
