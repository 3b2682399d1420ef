use std::fs::File;
use std::io::{self, BufWriter, Result, Write};

use crate::arch::axon::arbiter::{Transmission, MAGIC_DUMP, MAGIC_NOTIFY};
use crate::arch::axon::axon::{Axon, TickReport};
use crate::simulator::config::AppConfig;
use crate::simulator::sim::mode::{SimConfig, StepMode};
use crate::simulator::sim::shell::{Command, Shell};
use crate::log_info;
use crate::simulator::utils::log::set_quiet;

/// Reference operand patterns: small repeating values, so every output
/// word exercises the accumulation path without overflowing anything.
pub fn act_pattern(channel: u32, row: u32) -> i32 {
  ((channel + row) % 5 + 1) as i32
}

pub fn wt_pattern(out_channel: u32, _channel: u32, tap: u32) -> i32 {
  ((out_channel + tap) % 5 + 1) as i32
}

pub struct Simulator {
  config: SimConfig,
  axon: Axon,
  trace: Option<BufWriter<File>>,
}

impl Simulator {
  pub fn new(app: &AppConfig) -> Result<Self> {
    let config = app.sim_config();
    let mut axon = Axon::new(&app.axon_config());

    // First layer's operands must be resident before the handshakes fire
    axon.stage_activations_for(0, act_pattern);
    axon.stage_weights_for(0, 0, wt_pattern);

    let trace = match &config.trace_file {
      Some(path) => Some(BufWriter::new(File::create(path)?)),
      None => None,
    };

    Ok(Self { config, axon, trace })
  }

  pub fn run(&mut self) -> Result<()> {
    set_quiet(self.config.quiet);
    match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    }
  }

  fn run_continuous(&mut self) -> Result<()> {
    while !self.finished() {
      self.step()?;
    }
    self.report_summary();
    self.flush_trace()
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - Enter to step, 'si N', 'p <bank> <addr>', 'c' to continue, 'q' to quit");
    let mut shell = Shell::new()?;
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if self.finished() {
              break;
            }
            let report = self.step()?;
            println!(
              "tick {:>8}  layer {}  batch {}  pass {:>4}  {}",
              report.tick,
              report.layer_id,
              report.batch_id,
              report.pass_index,
              if report.busy { "busy" } else { "idle" }
            );
          }
          if self.finished() {
            break;
          }
        },
        Command::Continue => {
          while !self.finished() {
            self.step()?;
          }
          break;
        },
        Command::Peek { bank, addr } => {
          if bank < 16 {
            println!("bank[{}][{}] = {}", bank, addr, self.axon.banks().peek(bank, addr));
          } else {
            eprintln!("Error: bank must be 0..16");
          }
        },
        Command::Quit => break,
      }
    }
    self.report_summary();
    self.flush_trace()
  }

  fn finished(&self) -> bool {
    self.axon.layers_completed() >= self.config.layers
      || (self.config.max_ticks > 0 && self.axon.ticks_elapsed() >= self.config.max_ticks)
  }

  fn step(&mut self) -> Result<TickReport> {
    let report = self.axon.tick();

    if let Some(trace) = self.trace.as_mut() {
      let line = serde_json::to_string(&report)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
      writeln!(trace, "{}", line)?;
    }

    if let Some(tx) = report.transmission.clone() {
      self.handle_transmission(report.layer_id, &tx);
    }
    Ok(report)
  }

  /// React to channel traffic the way the host would: restage weights for
  /// the next batch after a notification, next layer's operands after a
  /// dump.
  fn handle_transmission(&mut self, layer_id: u32, tx: &Transmission) {
    match tx.header[0] {
      MAGIC_NOTIFY => {
        let batch = tx.header[2];
        log_info!("batch {} of layer {} complete", batch, layer_id);
        if batch + 1 < self.axon.layer_table().batch_ceiling(layer_id) {
          self.axon.stage_weights_for(layer_id, batch + 1, wt_pattern);
        }
      },
      MAGIC_DUMP => {
        log_info!("layer {} dumped ({} words)", tx.header[2], tx.header[5]);
        let next = self.axon.layer_table().next_layer(layer_id);
        self.axon.stage_activations_for(next, act_pattern);
        self.axon.stage_weights_for(next, 0, wt_pattern);
      },
      other => log::warn!("unknown transmission magic {:#x}", other),
    }
  }

  fn report_summary(&self) {
    log_info!(
      "simulation finished: {} layers in {} ticks",
      self.axon.layers_completed(),
      self.axon.ticks_elapsed()
    );
  }

  fn flush_trace(&mut self) -> Result<()> {
    if let Some(trace) = self.trace.as_mut() {
      trace.flush()?;
    }
    Ok(())
  }

  pub fn axon(&self) -> &Axon {
    &self.axon
  }
}
