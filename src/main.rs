mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod platform;
mod storage;
mod text_summary;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log to stderr. `RUST_LOG` wins over the verbosity flag.
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "error",
            1 => "actor_runner=info",
            _ => "actor_runner=debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);
    let is_json = args.json;

    match cli::run(args).await {
        Ok(code) => Ok(code),
        Err(e) => {
            if is_json {
                // Keep stdout machine-readable on failure too.
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
