// ABOUTME: coven-deploy CLI entry point.
// ABOUTME: Provides init, supervisor, and the internal worker subcommand.

use clap::{Parser, Subcommand};
use coven_deploy::{
    run_init, run_supervisor, run_worker, Catalog, SupervisorOptions, WorkerOptions,
};
use coven_deploy_core::Timing;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coven-deploy")]
#[command(about = "Supervisor for isolated deployment processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new coven-deploy configuration
    Init,
    /// Run the supervisor until every deployment has stopped
    Supervisor {
        /// Path to configuration file
        #[arg(long, env = "COVEN_DEPLOY_CONFIG")]
        config: Option<PathBuf>,
        /// Bootstrap module (overrides the config file)
        #[arg(long)]
        module: Option<String>,
        /// Bootstrap argument (overrides the config file)
        #[arg(long, allow_hyphen_values = true)]
        argument: Option<String>,
        /// Log to ~/.config/coven/coven-deploy/coven-deploy.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Run a single deployment (internal, spawned by the supervisor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        id: String,
        #[arg(long)]
        module: String,
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        argument: String,
        /// Module definition as JSON
        #[arg(long)]
        definition: Option<String>,
        #[arg(long)]
        modules_dir: PathBuf,
        /// Length of one time unit in milliseconds
        #[arg(long, default_value_t = 1000)]
        unit_ms: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            coven_log::init();
            run_init()
        }
        Commands::Supervisor {
            config: config_path,
            module,
            argument,
            log_file,
        } => {
            if log_file {
                coven_log::init_file("coven-deploy");
            } else {
                coven_log::init();
            }
            let outcome = run_supervisor(SupervisorOptions {
                config_path,
                module,
                argument,
            })
            .await?;
            std::process::exit(outcome.exit_code());
        }
        Commands::Worker {
            id,
            module,
            argument,
            definition,
            modules_dir,
            unit_ms,
        } => {
            coven_log::init_worker(&id);
            let definition = WorkerOptions::parse_definition(&module, definition.as_deref())?;
            run_worker(
                WorkerOptions {
                    id,
                    module,
                    argument,
                    definition,
                    modules_dir,
                    timing: Timing::from_millis(unit_ms),
                },
                &Catalog::builtin(),
            )
            .await
        }
    }
}
