use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::arch::axon::axon::AxonConfig;
use crate::arch::axon::layer::LayerConfig;
use crate::arch::axon::loader::TRANSFER_LATENCY;
use crate::simulator::sim::mode::{SimConfig, StepMode};

/// Simulation run controls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_layers")]
  pub layers: u64,
  #[serde(default = "default_max_ticks")]
  pub max_ticks: u64,
}

fn default_layers() -> u64 {
  3
}

fn default_max_ticks() -> u64 {
  0
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      layers: default_layers(),
      max_ticks: default_max_ticks(),
    }
  }
}

/// Accelerator knobs; an empty layer list selects the built-in stack.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcceleratorSection {
  #[serde(default = "default_auto_start")]
  pub auto_start: bool,
  #[serde(default)]
  pub use_bias: bool,
  #[serde(default = "default_transfer_latency")]
  pub transfer_latency: u32,
  #[serde(default)]
  pub layers: Vec<LayerConfig>,
}

fn default_auto_start() -> bool {
  true
}

fn default_transfer_latency() -> u32 {
  TRANSFER_LATENCY
}

impl Default for AcceleratorSection {
  fn default() -> Self {
    Self {
      auto_start: default_auto_start(),
      use_bias: false,
      transfer_latency: default_transfer_latency(),
      layers: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub simulation: SimulationSection,
  #[serde(default)]
  pub accelerator: AcceleratorSection,
}

impl AppConfig {
  pub fn sim_config(&self) -> SimConfig {
    SimConfig {
      quiet: self.simulation.quiet,
      step_mode: if self.simulation.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: if self.simulation.trace_file.is_empty() {
        None
      } else {
        Some(self.simulation.trace_file.clone())
      },
      layers: self.simulation.layers,
      max_ticks: self.simulation.max_ticks,
    }
  }

  pub fn axon_config(&self) -> AxonConfig {
    AxonConfig {
      auto_start: self.accelerator.auto_start,
      use_bias: self.accelerator.use_bias,
      transfer_latency: self.accelerator.transfer_latency,
      layers: self.accelerator.layers.clone(),
    }
  }
}

/// Load the configuration: built-in defaults, then the optional TOML
/// file, then AXON_* environment variables (AXON_SIMULATION__QUIET=1).
pub fn load_config(path: Option<&Path>) -> io::Result<AppConfig> {
  let mut builder = config::Config::builder();
  if let Some(p) = path {
    builder = builder.add_source(config::File::from(p).required(true));
  }
  builder = builder.add_source(config::Environment::with_prefix("AXON").separator("__"));

  let raw = builder
    .build()
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("config error: {}", e)))?;

  let mut app = AppConfig::default();
  if let Ok(section) = raw.get::<SimulationSection>("simulation") {
    app.simulation = section;
  }
  if let Ok(section) = raw.get::<AcceleratorSection>("accelerator") {
    app.accelerator = section;
  }
  validate_config(&app)?;
  Ok(app)
}

/// Write the built-in defaults as a starter configuration file.
pub fn write_default_config(path: &Path) -> io::Result<()> {
  let text = toml::to_string_pretty(&AppConfig::default())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
  fs::write(path, text)
}

/// Apply CLI flags on top of the loaded configuration.
pub fn apply_cli_overrides(
  config: &mut AppConfig,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  layers: Option<u64>,
  max_ticks: Option<u64>,
) {
  if quiet {
    config.simulation.quiet = true;
  }
  if step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if let Some(n) = layers {
    config.simulation.layers = n;
  }
  if let Some(n) = max_ticks {
    config.simulation.max_ticks = n;
  }
}

/// Reject layer tables the address decode cannot serve.
pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  for (i, layer) in config.accelerator.layers.iter().enumerate() {
    let fail = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidData, msg));
    if layer.batches_for_layer == 0 || layer.tile_count % layer.batches_for_layer != 0 {
      return fail(format!("layer {}: tile_count must be a multiple of batches_for_layer", i));
    }
    if layer.input_channels % 16 != 0 || layer.input_channels == 0 {
      return fail(format!("layer {}: input_channels must be a non-zero multiple of 16", i));
    }
    if layer.input_rows == 0 || layer.output_length != 2 * layer.input_rows {
      return fail(format!("layer {}: output_length must equal 2 * input_rows", i));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_select_builtin_layer_stack() {
    let app = AppConfig::default();
    assert!(app.accelerator.layers.is_empty());
    assert_eq!(app.simulation.layers, 3);
    let sim = app.sim_config();
    assert_eq!(sim.step_mode, StepMode::Continuous);
    assert!(sim.trace_file.is_none());
  }

  #[test]
  fn toml_section_round_trips() {
    let text = r#"
      [simulation]
      quiet = true
      layers = 1

      [accelerator]
      transfer_latency = 4

      [[accelerator.layers]]
      input_rows = 2
      input_channels = 16
      output_length = 4
      output_channels = 16
      tile_count = 4
      batches_for_layer = 2
    "#;
    let app: AppConfig = toml::from_str(text).unwrap();
    assert!(app.simulation.quiet);
    assert_eq!(app.simulation.layers, 1);
    assert_eq!(app.accelerator.transfer_latency, 4);
    assert_eq!(app.accelerator.layers.len(), 1);
    assert!(validate_config(&app).is_ok());
  }

  #[test]
  fn invalid_layer_geometry_rejected() {
    let mut app = AppConfig::default();
    app.accelerator.layers.push(LayerConfig {
      input_rows: 2,
      input_channels: 15,
      output_length: 4,
      output_channels: 16,
      tile_count: 4,
      batches_for_layer: 2,
    });
    assert!(validate_config(&app).is_err());
  }

  #[test]
  fn cli_overrides_win() {
    let mut app = AppConfig::default();
    apply_cli_overrides(&mut app, true, true, Some("trace.jsonl"), Some(2), None);
    assert!(app.simulation.quiet);
    assert!(app.simulation.step_mode);
    assert_eq!(app.simulation.trace_file, "trace.jsonl");
    assert_eq!(app.simulation.layers, 2);
  }
}
