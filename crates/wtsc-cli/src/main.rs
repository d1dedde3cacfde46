mod cmd;
mod logger;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use wtsc_core::{ConfigSource, LogFormat};

#[derive(Parser)]
#[command(
    name = "wtsc",
    about = "What-to-stake consumer: keeps Pocket servicers staked on the recommended services",
    version
)]
struct Cli {
    /// Directory holding the config file (default: current directory)
    #[arg(long, global = true, env = "PROJECT_ROOT")]
    project_root: Option<PathBuf>,

    /// Config file name, relative to the project root
    #[arg(long, global = true, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and config reload loop until SIGINT/SIGTERM (default)
    Run {
        /// Seconds between config reloads
        #[arg(long, env = "RELOAD_SECONDS")]
        reload_seconds: Option<String>,
    },

    /// Check the config file and report invalid keys
    Validate,
}

fn main() {
    let cli = Cli::parse();
    let source = ConfigSource::new(cli.project_root, cli.config_file.as_deref());

    let result = match cli.command {
        Some(Commands::Validate) => logger::Logger::init(LevelFilter::WARN, LogFormat::Text)
            .and_then(|_| cmd::validate::run(&source, cli.json)),
        Some(Commands::Run { reload_seconds }) => cmd::run::run(source, reload_seconds),
        None => cmd::run::run(source, std::env::var("RELOAD_SECONDS").ok()),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
