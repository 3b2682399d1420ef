use axon::simulator::config::{apply_cli_overrides, load_config, write_default_config};
use axon::simulator::utils::log::init_log;
use axon::simulator::Simulator;
use clap::Parser;
use std::path::Path;

/// Axon - a transposed-convolution accelerator simulator
#[derive(Parser, Debug)]
#[command(name = "axon")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-level simulator for the axon accelerator core", long_about = None)]
struct Args {
  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Configuration file (TOML)
  #[arg(short, long, value_name = "FILE")]
  config: Option<String>,

  /// Output trace file path (JSON lines, one record per tick)
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Stop after this many completed layers
  #[arg(short, long, value_name = "N")]
  layers: Option<u64>,

  /// Hard tick ceiling (0 = unlimited)
  #[arg(long, value_name = "N")]
  max_ticks: Option<u64>,

  /// Write a starter configuration file and exit
  #[arg(long, value_name = "FILE")]
  init_config: Option<String>,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  if let Some(path) = args.init_config.as_deref() {
    write_default_config(Path::new(path))?;
    println!("Wrote default configuration to {}", path);
    return Ok(());
  }

  let mut config = load_config(args.config.as_deref().map(Path::new))?;
  apply_cli_overrides(
    &mut config,
    args.quiet,
    args.step,
    args.trace_file.as_deref(),
    args.layers,
    args.max_ticks,
  );

  let mut simulator = Simulator::new(&config)?;
  simulator.run()
}
