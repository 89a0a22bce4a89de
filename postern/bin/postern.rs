#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use postern::{Config, Postern};
use postern_common::{logging, tracing::error};

/// Relay a mailbox to its configured destinations, once.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Name of the configuration, resolved to `<config-dir>/<name>.ron`
    name: String,

    /// Directory holding named configurations
    #[arg(long, env = "POSTERN_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init();

    let config = Config::load(&cli.name, &cli.config_dir).inspect_err(|e| error!("{e}"))?;
    let summary = Postern::new(config)
        .run()
        .await
        .inspect_err(|e| error!("Run aborted: {e:#}"))?;

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
