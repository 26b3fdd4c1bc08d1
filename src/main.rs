#![warn(unused_qualifications)]

pub mod args;
pub mod config;
pub mod run;
pub mod viewer;

use std::path::PathBuf;

use cem_solver::scenario::Scenario;
use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Error,
    bail,
};
use dotenvy::dotenv;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

fn main() -> Result<(), Error> {
    let _ = dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run(args) => run::run(args)?,
        Command::PostProcess(args) => run::post_process(args)?,
        Command::DumpDefaultConfig { output, format } => {
            dump(&AppConfig::default(), output, &format)?;
        }
        Command::DumpDefaultScenario { output, format } => {
            dump(&Scenario::default(), output, &format)?;
        }
    }

    Ok(())
}

fn dump<T: Serialize>(value: &T, output: Option<PathBuf>, format: &str) -> Result<(), Error> {
    let value = match format {
        "toml" => toml::to_string_pretty(value)?,
        "json" => serde_json::to_string_pretty(value)?,
        _ => bail!("Invalid format: {format}"),
    };
    if let Some(output) = &output {
        std::fs::write(output, &value)?;
    }
    else {
        println!("{value}");
    }
    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs a scenario and computes its S-parameters.
    Run(args::RunArgs),
    /// Computes S-parameters from an existing run record.
    PostProcess(args::PostProcessArgs),
    DumpDefaultConfig {
        #[clap(short, long)]
        output: Option<PathBuf>,
        #[clap(short, long, default_value = "toml")]
        format: String,
    },
    /// Prints the built-in parallel-plate scenario.
    DumpDefaultScenario {
        #[clap(short, long)]
        output: Option<PathBuf>,
        #[clap(short, long, default_value = "toml")]
        format: String,
    },
}
