use serde::{Deserialize, Serialize};

use super::accumulator::{Accumulator, LaneEvent};
use super::arbiter::{ArbiterInputs, OutputArbiter, Transmission, MAGIC_DUMP};
use super::auto_scheduler::{AutoInputs, AutoScheduler};
use super::bank::{BankArray, Storage};
use super::lanes::LaneArray;
use super::layer::{LayerConfig, LayerTable, ACT_BANK_DEPTH, OUT_BANK_DEPTH, WT_BANK_DEPTH};
use super::loader::{self, LoaderFrontEnd, LoaderRequests, TRANSFER_LATENCY};
use super::mapper::AddressMapper;
use super::pass_scheduler::{PassInputs, PassScheduler};

/// Accelerator-level configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxonConfig {
  pub auto_start: bool,
  pub use_bias: bool,
  pub transfer_latency: u32,
  #[serde(default)]
  pub layers: Vec<LayerConfig>,
}

impl Default for AxonConfig {
  fn default() -> Self {
    Self {
      auto_start: true,
      use_bias: false,
      transfer_latency: TRANSFER_LATENCY,
      layers: Vec::new(),
    }
  }
}

/// Previous-tick outputs carried into the next tick. Every cross-component
/// signal that closes a feedback loop goes through here, so a tick only
/// ever observes values computed on the tick before.
#[derive(Debug, Clone, Copy, Default)]
struct Wires {
  loader_req: LoaderRequests,
  batch_complete: bool,
  lane_done_count: u8,
  lane_event: Option<LaneEvent>,
  channel_busy: bool,
  dump_ack: bool,
}

/// Per-tick observation record, serialized as one trace line.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
  pub tick: u64,
  pub layer_id: u32,
  pub batch_id: u32,
  pub pass_index: u32,
  pub busy: bool,
  pub accumulator_in_flight: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transmission: Option<Transmission>,
}

/// The accelerator core: schedulers, mapper, accumulator and arbiter wired
/// around the operand storages and output banks. One `tick()` advances the
/// whole machine a single cycle.
#[derive(Debug)]
pub struct Axon {
  layers: LayerTable,

  frontend: LoaderFrontEnd,
  auto: AutoScheduler,
  pass: PassScheduler,
  mapper: AddressMapper,
  lanes: LaneArray,
  accum: Accumulator,
  arbiter: OutputArbiter,

  act: Storage,
  wt: Storage,
  banks: BankArray,

  wires: Wires,
  tick: u64,
  layers_completed: u64,
  start_pulse: bool,
}

impl Axon {
  pub fn new(config: &AxonConfig) -> Self {
    Self {
      layers: LayerTable::new(config.layers.clone()),
      frontend: LoaderFrontEnd::new(config.transfer_latency),
      auto: AutoScheduler::new(config.auto_start, config.use_bias),
      pass: PassScheduler::new(),
      mapper: AddressMapper::new(),
      lanes: LaneArray::new(),
      accum: Accumulator::new(),
      arbiter: OutputArbiter::new(),
      act: Storage::new(ACT_BANK_DEPTH),
      wt: Storage::new(WT_BANK_DEPTH),
      banks: BankArray::new(OUT_BANK_DEPTH),
      wires: Wires::default(),
      tick: 0,
      layers_completed: 0,
      start_pulse: false,
    }
  }

  /// Manual start override; equivalent to configuring auto_start.
  pub fn start(&mut self) {
    self.start_pulse = true;
  }

  /// Advance the machine one cycle.
  pub fn tick(&mut self) -> TickReport {
    let w = self.wires;
    self.tick += 1;

    // Banks commit last tick's reads before anything samples them
    self.banks.step();

    let loads = self.frontend.step(&w.loader_req);
    let auto_out = self.auto.step(
      &AutoInputs {
        manual_start: std::mem::take(&mut self.start_pulse),
        activation_complete: loads.activation,
        weight_complete: loads.weight,
        bias_complete: loads.bias,
        batch_complete: w.batch_complete,
        channel_busy: w.channel_busy,
      },
      &self.layers,
    );
    let layer = *self.layers.get(auto_out.layer_id);
    if auto_out.clear_banks {
      self.banks.clear_all();
    }

    let pass_out = self.pass.step(
      &PassInputs {
        start: auto_out.pass_start,
        batch_id: auto_out.batch_id,
        layer_id: auto_out.layer_id,
        lane_done_count: w.lane_done_count,
      },
      &layer,
    );
    let mapper_out = self.mapper.step(&pass_out.mapper_req, &layer);
    let lane_out = self.lanes.step(&pass_out.lane, &self.act, &self.wt);
    self
      .accum
      .step(w.lane_event, mapper_out.snapshot.as_ref(), &mut self.banks);

    let arb_out = self.arbiter.step(
      &ArbiterInputs {
        notify: auto_out.notify,
        layer_done: auto_out.layer_done,
        dump_ack: w.dump_ack,
      },
      &layer,
      &mut self.banks,
    );

    if auto_out.layer_done.is_some() {
      self.layers_completed += 1;
    }
    let dump_emitted = arb_out
      .transmission
      .as_ref()
      .map(|t| t.header[0] == MAGIC_DUMP)
      .unwrap_or(false);

    self.wires = Wires {
      loader_req: LoaderRequests {
        activation: auto_out.need_activation,
        weight: auto_out.need_weight,
        bias: auto_out.need_bias,
      },
      batch_complete: pass_out.batch_complete,
      lane_done_count: lane_out.done_count,
      lane_event: lane_out.event,
      // Covers the pending slots too: a queued dump must drain before the
      // next layer may clear the banks
      channel_busy: !self.arbiter.is_idle(),
      // Downstream consumer model: a dump is read out within one tick
      dump_ack: dump_emitted,
    };

    TickReport {
      tick: self.tick,
      layer_id: auto_out.layer_id,
      batch_id: auto_out.batch_id,
      pass_index: pass_out.pass_index,
      busy: pass_out.busy,
      accumulator_in_flight: self.accum.in_flight(),
      transmission: arb_out.transmission,
    }
  }

  pub fn current_layer(&self) -> LayerConfig {
    *self.layers.get(self.auto.layer_id())
  }

  pub fn layer_table(&self) -> &LayerTable {
    &self.layers
  }

  pub fn ticks_elapsed(&self) -> u64 {
    self.tick
  }

  pub fn layers_completed(&self) -> u64 {
    self.layers_completed
  }

  pub fn banks(&self) -> &BankArray {
    &self.banks
  }

  /// Stage the current layer's input feature map into activation storage.
  pub fn stage_activations<F>(&mut self, value: F)
  where
    F: Fn(u32, u32) -> i32,
  {
    let layer = self.current_layer();
    loader::stage_activations(&mut self.act, &layer, value);
  }

  /// Stage one batch's weights into weight storage.
  pub fn stage_weights<F>(&mut self, batch_id: u32, value: F)
  where
    F: Fn(u32, u32, u32) -> i32,
  {
    let layer = self.current_layer();
    loader::stage_weights(&mut self.wt, &layer, batch_id, value);
  }

  /// Stage activations for an explicit layer, ahead of its transition.
  pub fn stage_activations_for<F>(&mut self, layer_id: u32, value: F)
  where
    F: Fn(u32, u32) -> i32,
  {
    let layer = *self.layers.get(layer_id);
    loader::stage_activations(&mut self.act, &layer, value);
  }

  /// Stage weights for an explicit layer and batch.
  pub fn stage_weights_for<F>(&mut self, layer_id: u32, batch_id: u32, value: F)
  where
    F: Fn(u32, u32, u32) -> i32,
  {
    let layer = *self.layers.get(layer_id);
    loader::stage_weights(&mut self.wt, &layer, batch_id, value);
  }

  pub fn reset(&mut self) {
    self.frontend.reset();
    self.auto.reset();
    self.pass.reset();
    self.mapper.reset();
    self.lanes.reset();
    self.accum.reset();
    self.arbiter.reset(&mut self.banks);
    self.banks.clear_all();
    self.wires = Wires::default();
    self.tick = 0;
    self.layers_completed = 0;
    self.start_pulse = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::arbiter::MAGIC_NOTIFY;

  fn tiny_config() -> AxonConfig {
    // 2 rows, 16 input channels, 16 output channels over 4 tiles, 2 batches
    AxonConfig {
      auto_start: true,
      use_bias: false,
      transfer_latency: 2,
      layers: vec![LayerConfig {
        input_rows: 2,
        input_channels: 16,
        output_length: 4,
        output_channels: 16,
        tile_count: 4,
        batches_for_layer: 2,
      }],
    }
  }

  /// Tick until the predicate accepts a report, panicking past the budget.
  fn run_until<F>(axon: &mut Axon, budget: u64, mut pred: F) -> TickReport
  where
    F: FnMut(&TickReport) -> bool,
  {
    for _ in 0..budget {
      let report = axon.tick();
      if pred(&report) {
        return report;
      }
    }
    panic!("tick budget exhausted");
  }

  #[test]
  fn one_layer_runs_to_dump_with_uniform_operands() {
    let mut axon = Axon::new(&tiny_config());
    axon.stage_activations(|_, _| 1);
    axon.stage_weights(0, |_, _, _| 1);

    let notif = run_until(&mut axon, 2000, |r| {
      r.transmission
        .as_ref()
        .map(|t| t.header[0] == MAGIC_NOTIFY)
        .unwrap_or(false)
    });
    assert_eq!(notif.transmission.as_ref().map(|t| t.header[2]), Some(0));

    axon.stage_weights(1, |_, _, _| 1);
    let dump = run_until(&mut axon, 4000, |r| {
      r.transmission
        .as_ref()
        .map(|t| t.header[0] == MAGIC_DUMP)
        .unwrap_or(false)
    });
    let tx = dump.transmission.as_ref().map(|t| t.payload.clone());
    let payload = tx.unwrap();
    assert_eq!(payload.len(), 64);

    // All-ones operands: out[f][t] = 16 * |{(r, k) : 2r - 1 + k = t}|,
    // which is 1 valid pair at the borders (t 0 and 3) and 2 inside
    for f in 0..16usize {
      assert_eq!(payload[f * 4], 16, "channel {} time 0", f);
      assert_eq!(payload[f * 4 + 1], 32);
      assert_eq!(payload[f * 4 + 2], 32);
      assert_eq!(payload[f * 4 + 3], 16);
    }
    assert_eq!(axon.layers_completed(), 1);
  }

  #[test]
  fn single_layer_table_wraps_onto_itself() {
    let mut axon = Axon::new(&tiny_config());
    axon.stage_activations(|_, _| 1);
    axon.stage_weights(0, |_, _, _| 1);

    run_until(&mut axon, 2000, |r| r.transmission.is_some());
    axon.stage_weights(1, |_, _, _| 1);
    run_until(&mut axon, 4000, |r| {
      r.transmission
        .as_ref()
        .map(|t| t.header[0] == MAGIC_DUMP)
        .unwrap_or(false)
    });

    // The handshake channels re-arm on their own, so the wrapped layer 0
    // starts again from batch 0 on fresh operands
    axon.stage_weights(0, |_, _, _| 2);
    let notif = run_until(&mut axon, 2000, |r| {
      r.transmission
        .as_ref()
        .map(|t| t.header[0] == MAGIC_NOTIFY)
        .unwrap_or(false)
    });
    assert_eq!(notif.batch_id, 0);
    assert_eq!(notif.layer_id, 0);
  }

  #[test]
  fn manual_start_required_when_auto_disabled() {
    let mut config = tiny_config();
    config.auto_start = false;
    let mut axon = Axon::new(&config);
    axon.stage_activations(|_, _| 1);
    axon.stage_weights(0, |_, _, _| 1);

    for _ in 0..50 {
      let report = axon.tick();
      assert!(!report.busy);
    }
    axon.start();
    let report = run_until(&mut axon, 50, |r| r.busy);
    assert_eq!(report.layer_id, 0);
  }
}
