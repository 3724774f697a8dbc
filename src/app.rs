//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs the log subscriber
//! - parses CLI arguments
//! - runs the requested pipeline stages
//! - prints the run summary

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, CompileArgs, ModelArgs, RunArgs};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `deaths` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Model(args) => handle_model(args),
        Command::Compile(args) => handle_compile(args),
    }
}

fn init_tracing() {
    // Logs go to stderr so stdout carries only the run summary.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = args.to_config();
    let metadata = pipeline::run_all(&config)?;
    println!("{}", crate::report::format_run_summary(&metadata, &config.output_root));
    Ok(())
}

fn handle_model(args: ModelArgs) -> Result<(), AppError> {
    let path = pipeline::model_one(&args.output_root, args.location)?;
    println!("{}", path.display());
    Ok(())
}

fn handle_compile(args: CompileArgs) -> Result<(), AppError> {
    let metadata = pipeline::compile(&args.output_root, args.infection_threads)?;
    println!("{}", crate::report::format_run_summary(&metadata, &args.output_root));
    Ok(())
}
