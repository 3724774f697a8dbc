//! Command-line parsing for the holdout-ensemble death model.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::compile::DEFAULT_INFECTION_THREADS;
use crate::domain::{LocationId, RunConfig};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "deaths", version, about = "Holdout-ensemble death rate draws and aggregates")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prepare inputs, model every location, then compile published outputs.
    Run(RunArgs),
    /// Model a single location from a prepared working directory.
    Model(ModelArgs),
    /// Compile published outputs from an existing working directory.
    Compile(CompileArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Model-input CSV (location_id, location_name, date, rate columns, population).
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Location hierarchy CSV (location_id, parent_id, location_name).
    #[arg(long, value_name = "CSV")]
    pub hierarchy: PathBuf,

    /// Infections draw table joined into the per-draw infection files.
    #[arg(long, value_name = "CSV")]
    pub infections: Option<PathBuf>,

    /// Directory for the working files and published outputs.
    #[arg(long, value_name = "DIR")]
    pub output_root: PathBuf,

    /// Number of positive holdout depths (iterations = holdouts + 1).
    #[arg(long, default_value_t = 3)]
    pub holdouts: usize,

    /// Total draws per location across every holdout iteration.
    #[arg(long, default_value_t = 1000)]
    pub draws: usize,

    /// Drop this many trailing dates from every input series.
    #[arg(long, default_value_t = 0)]
    pub holdout_days: usize,

    /// Base seed; each location derives its own from it.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Location worker threads (0 = one per core).
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Threads writing the per-draw infection files.
    #[arg(long, default_value_t = DEFAULT_INFECTION_THREADS)]
    pub infection_threads: usize,

    /// Minimum cumulative deaths for a location to be modeled.
    #[arg(long, default_value_t = 5.0)]
    pub death_threshold: f64,

    /// Minimum cumulative cases/hospitalizations to run the matching first stage.
    #[arg(long, default_value_t = 10.0)]
    pub epi_threshold: f64,
}

impl RunArgs {
    pub fn to_config(&self) -> RunConfig {
        RunConfig {
            input: self.input.clone(),
            hierarchy: self.hierarchy.clone(),
            infections: self.infections.clone(),
            output_root: self.output_root.clone(),
            holdouts: self.holdouts,
            n_draws: self.draws,
            holdout_days: self.holdout_days,
            seed: self.seed,
            threads: self.threads,
            infection_threads: self.infection_threads,
            death_threshold: self.death_threshold,
            epi_threshold: self.epi_threshold,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Output root of a prepared run.
    #[arg(long, value_name = "DIR")]
    pub output_root: PathBuf,

    /// Location to model.
    #[arg(long, value_parser = parse_location_id)]
    pub location: LocationId,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    /// Output root of a prepared and modeled run.
    #[arg(long, value_name = "DIR")]
    pub output_root: PathBuf,

    /// Threads writing the per-draw infection files.
    #[arg(long, default_value_t = DEFAULT_INFECTION_THREADS)]
    pub infection_threads: usize,
}

fn parse_location_id(s: &str) -> Result<LocationId, String> {
    s.trim()
        .parse::<i64>()
        .map(LocationId)
        .map_err(|_| format!("invalid location id '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::parse_from([
            "deaths",
            "run",
            "--input",
            "in.csv",
            "--hierarchy",
            "h.csv",
            "--output-root",
            "out",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config();
        assert_eq!(config.holdouts, 3);
        assert_eq!(config.n_draws, 1000);
        assert_eq!(config.infection_threads, 25);
        assert_eq!(config.death_threshold, 5.0);
        assert_eq!(config.epi_threshold, 10.0);
        assert!(config.infections.is_none());
    }

    #[test]
    fn model_takes_location() {
        let cli = Cli::parse_from(["deaths", "model", "--output-root", "out", "--location", "523"]);
        let Command::Model(args) = cli.command else {
            panic!("expected model");
        };
        assert_eq!(args.location, LocationId(523));
    }
}
