use super::lanes::LaneInputs;
use super::layer::{LayerConfig, WT_TILE_BAND};
use super::mapper::MapperRequest;

/// Signals into the pass scheduler for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassInputs {
  /// Start pulse from the auto-scheduler.
  pub start: bool,
  pub batch_id: u32,
  pub layer_id: u32,
  /// Lane-array done counter (previous tick's value).
  pub lane_done_count: u8,
}

/// Complete output record for one tick: defaults everywhere, the active
/// state overrides what it drives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOutputs {
  pub mapper_req: MapperRequest,
  pub lane: LaneInputs,
  /// Pulses once when the batch's last pass has drained.
  pub batch_complete: bool,
  pub busy: bool,
  pub pass_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
  Idle,
  StartAll,
  WaitSettle(u8),
  StartCompute,
  WaitCompute,
  Done,
}

/// Per-batch sequencer: walks pass_index through every (tile-in-batch,
/// row-in-tile) pair, driving the mapper, the operand loads and the lane
/// array for each pass.
#[derive(Debug)]
pub struct PassScheduler {
  state: PassState,
  pass_index: u32,
  batch_id: u32,
  layer_id: u32,
}

impl PassScheduler {
  pub fn new() -> Self {
    Self {
      state: PassState::Idle,
      pass_index: 0,
      batch_id: 0,
      layer_id: 0,
    }
  }

  pub fn step(&mut self, inp: &PassInputs, layer: &LayerConfig) -> PassOutputs {
    let mut out = PassOutputs {
      pass_index: self.pass_index,
      busy: self.state != PassState::Idle,
      ..PassOutputs::default()
    };

    match self.state {
      PassState::Idle => {
        if inp.start {
          self.batch_id = inp.batch_id;
          self.layer_id = inp.layer_id;
          self.pass_index = 0;
          self.state = PassState::StartAll;
          out.busy = true;
          log::debug!(
            "pass-sched: batch {} of layer {} started ({} passes)",
            self.batch_id,
            self.layer_id,
            layer.passes_per_batch()
          );
        }
      },
      PassState::StartAll => {
        // Row-in-tile in the low bits, tile-in-batch above them; the bit
        // split follows the layer's row count.
        let rows = layer.input_rows;
        let row_id = self.pass_index % rows;
        let tile_in_batch = self.pass_index / rows;
        let tile_id = self.batch_id * layer.tiles_per_batch() + tile_in_batch;

        out.mapper_req = MapperRequest {
          start: true,
          row_id,
          tile_id,
          layer_id: self.layer_id,
        };
        out.lane = LaneInputs {
          load_start: true,
          act_base: row_id * layer.activation_band(),
          wt_base: tile_in_batch * WT_TILE_BAND,
          compute_start: false,
          iterations: 0,
        };
        self.state = PassState::WaitSettle(2);
      },
      PassState::WaitSettle(ticks) => {
        self.state = if ticks == 1 {
          PassState::StartCompute
        } else {
          PassState::WaitSettle(ticks - 1)
        };
      },
      PassState::StartCompute => {
        out.lane = LaneInputs {
          compute_start: true,
          iterations: layer.compute_iterations(),
          ..LaneInputs::default()
        };
        self.state = PassState::WaitCompute;
      },
      PassState::WaitCompute => {
        if inp.lane_done_count as usize == super::layer::LANES {
          self.pass_index += 1;
          if self.pass_index == layer.passes_per_batch() {
            self.state = PassState::Done;
          } else {
            self.state = PassState::StartAll;
          }
        }
      },
      PassState::Done => {
        out.batch_complete = true;
        log::debug!(
          "pass-sched: batch {} of layer {} complete",
          self.batch_id,
          self.layer_id
        );
        self.state = PassState::Idle;
      },
    }

    out
  }

  pub fn reset(&mut self) {
    self.state = PassState::Idle;
    self.pass_index = 0;
  }
}
