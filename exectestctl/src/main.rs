mod batch;
mod config;

use anyhow::Result;
use capsules_exec_test::{EnvVar, EvaluationInput, Harness};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "exectestctl", version)]
#[command(about = "Runs test scripts against digest-pinned container images")]
struct Cli {
    #[command(flatten)]
    config: Config,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one test script against an image
    Run(RunArgs),
    /// Run every request in a YAML or JSON file concurrently
    Batch {
        /// Path to the request file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print version and exit
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Image reference, by tag or digest
    #[arg(long)]
    digest: String,
    /// Inline shell script, or path to an executable relative to the working directory
    #[arg(long)]
    script: String,
    /// Extra environment variable for the script (repeatable)
    #[arg(long = "env", value_name = "NAME=VALUE", value_parser = parse_env_var)]
    env: Vec<EnvVar>,
    /// Directory the script runs in (defaults to the current directory)
    #[arg(long)]
    working_dir: Option<PathBuf>,
    /// Timeout in seconds; 0 uses the configured default
    #[arg(long)]
    timeout_seconds: Option<u64>,
}

impl RunArgs {
    fn into_input(self) -> EvaluationInput {
        EvaluationInput {
            digest: self.digest,
            script: self.script,
            env: self.env,
            working_dir: self.working_dir,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

fn parse_env_var(raw: &str) -> Result<EnvVar, String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(EnvVar::new(name, value)),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn init_tracing(json: bool) {
    let builder = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.config.log_json);

    match cli.cmd {
        Commands::Run(args) => {
            let harness = Harness::new(cli.config.resolver()?, cli.config.settings());
            match harness.evaluate(&args.into_input()) {
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(err) => {
                    eprintln!("{}", err);
                    std::process::exit(1);
                }
            }
        }
        Commands::Batch { file } => {
            let requests = batch::load(&file)?;
            let harness = Harness::new(cli.config.resolver()?, cli.config.settings());
            let results = batch::run_all(&harness, requests);
            println!("{}", serde_json::to_string_pretty(&results)?);
            if !results.iter().all(batch::BatchResult::is_success) {
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
