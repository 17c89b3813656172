//! ceplite CLI - run the demo pipelines against the continuous query engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use ceplite_cli::config::Config;
use ceplite_cli::demo;

#[derive(Parser)]
#[command(name = "ceplite")]
#[command(version)]
#[command(about = "ceplite - in-process complex event processing", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "CEPLITE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one of the demo pipelines
    Demo {
        #[command(subcommand)]
        which: DemoKind,

        /// Records per producer (overrides the config file)
        #[arg(short, long)]
        records: Option<usize>,

        /// Skip the random delay between records
        #[arg(long)]
        immediate: bool,

        /// RNG seed (overrides the config file)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate example configuration file
    ConfigExample {
        /// Output format (yaml, toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum DemoKind {
    /// Stock growth pattern joined apple versus cisco
    Finance,
    /// Tweet counts per sentiment and keyword
    Sentiment,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    ceplite_cli::init_logging(&config.logging)?;

    match cli.command {
        Commands::Demo {
            which,
            records,
            immediate,
            seed,
        } => {
            if let Some(records) = records {
                config.simulation.records = records;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            config.simulation.immediate |= immediate;

            match which {
                DemoKind::Finance => {
                    let summary = demo::run_finance(&config)?;
                    info!(
                        "Finance demo done: {} stock events, {} growth matches, {} joined rows",
                        summary.stock_events, summary.growth_events, summary.joined_rows
                    );
                    info!("Metrics: {:?}", summary.shutdown.metrics);
                }
                DemoKind::Sentiment => {
                    let summary = demo::run_sentiment(&config)?;
                    info!("Sentiment demo done: {} tweets", summary.tweets);
                    for (group, count) in &summary.counts {
                        println!("{:<20} {}", group, count);
                    }
                }
            }
        }

        Commands::ConfigExample { format, output } => {
            let content = match format.to_lowercase().as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }
    }

    Ok(())
}
