use super::layer::LayerTable;

/// Notification payload for a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDone {
  pub batch_id: u32,
  pub layer_id: u32,
}

/// Dump request raised when a layer's last batch has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDone {
  pub layer_id: u32,
}

/// Signals into the auto-scheduler for one tick. The loader complete
/// signals are levels; the scheduler does its own rising-edge detection
/// (a handshake must fall and rise again to count as a new completion).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoInputs {
  pub manual_start: bool,
  pub activation_complete: bool,
  pub weight_complete: bool,
  pub bias_complete: bool,
  /// Pulse from the pass scheduler.
  pub batch_complete: bool,
  /// High while the output arbiter still owns the banks (dump in
  /// progress); holds off the layer transition so the clear pulse never
  /// races the readout.
  pub channel_busy: bool,
}

/// Complete output record for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoOutputs {
  /// Start pulse to the pass scheduler.
  pub pass_start: bool,
  pub batch_id: u32,
  pub layer_id: u32,
  /// Held high for two ticks ahead of a new layer's first accumulation.
  pub clear_banks: bool,
  /// Levels telling the loader front end what is being waited on.
  pub need_activation: bool,
  pub need_weight: bool,
  pub need_bias: bool,
  /// Events for the output arbiter.
  pub notify: Option<BatchDone>,
  pub layer_done: Option<LayerDone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoState {
  Idle,
  WaitInitial,
  Running,
  Next,
  AllDone,
}

/// Multi-batch/layer sequencer.
///
/// Reload policy: the weight flag clears at every batch start (weights are
/// always reloaded per batch); activation and bias flags clear only when a
/// layer's last batch completes, so a weight-only handshake restarts
/// mid-layer batches and a full set of fresh handshakes is what advances
/// the layer.
#[derive(Debug)]
pub struct AutoScheduler {
  state: AutoState,
  layer_id: u32,
  batch_id: u32,

  activation_loaded: bool,
  weight_loaded: bool,
  bias_loaded: bool,
  prev_activation: bool,
  prev_weight: bool,
  prev_bias: bool,

  /// Remaining ticks of the clear-banks pulse before the pending start.
  clear_ticks: u8,
  start_pending: bool,
  auto_start: bool,
  use_bias: bool,
}

impl AutoScheduler {
  pub fn new(auto_start: bool, use_bias: bool) -> Self {
    Self {
      state: AutoState::Idle,
      layer_id: 0,
      batch_id: 0,
      activation_loaded: false,
      weight_loaded: false,
      bias_loaded: false,
      prev_activation: false,
      prev_weight: false,
      prev_bias: false,
      clear_ticks: 0,
      start_pending: false,
      auto_start,
      use_bias,
    }
  }

  fn track_handshakes(&mut self, inp: &AutoInputs) {
    if inp.activation_complete && !self.prev_activation {
      self.activation_loaded = true;
    }
    if inp.weight_complete && !self.prev_weight {
      self.weight_loaded = true;
    }
    if inp.bias_complete && !self.prev_bias {
      self.bias_loaded = true;
    }
    self.prev_activation = inp.activation_complete;
    self.prev_weight = inp.weight_complete;
    self.prev_bias = inp.bias_complete;
  }

  fn full_set(&self) -> bool {
    self.activation_loaded && self.weight_loaded && (self.bias_loaded || !self.use_bias)
  }

  pub fn step(&mut self, inp: &AutoInputs, layers: &LayerTable) -> AutoOutputs {
    self.track_handshakes(inp);

    let mut out = AutoOutputs {
      batch_id: self.batch_id,
      layer_id: self.layer_id,
      ..AutoOutputs::default()
    };

    match self.state {
      AutoState::Idle => {
        if self.auto_start || inp.manual_start {
          self.state = AutoState::WaitInitial;
        }
      },
      AutoState::WaitInitial => {
        out.need_activation = !self.activation_loaded;
        out.need_weight = !self.weight_loaded;
        out.need_bias = self.use_bias && !self.bias_loaded;
        if self.full_set() {
          // Full load: batch counter starts from zero
          self.batch_id = 0;
          out.batch_id = 0;
          out.pass_start = true;
          self.weight_loaded = false;
          self.state = AutoState::Running;
          log::info!("auto-sched: layer {} batch 0 started (full load)", self.layer_id);
        }
      },
      AutoState::Running => {
        if inp.batch_complete {
          out.notify = Some(BatchDone {
            batch_id: self.batch_id,
            layer_id: self.layer_id,
          });
          self.state = AutoState::Next;
        }
      },
      AutoState::Next => {
        let ceiling = layers.batch_ceiling(self.layer_id);
        if self.batch_id + 1 < ceiling {
          // Weight-only reload keeps activations and bias resident
          out.need_weight = true;
          if self.weight_loaded {
            self.batch_id += 1;
            out.batch_id = self.batch_id;
            out.pass_start = true;
            self.weight_loaded = false;
            self.state = AutoState::Running;
            log::info!(
              "auto-sched: layer {} batch {} started (weight reload)",
              self.layer_id,
              self.batch_id
            );
          }
        } else {
          // The increment that lands on the ceiling forces the full path
          self.batch_id = ceiling;
          out.batch_id = ceiling;
          out.layer_done = Some(LayerDone {
            layer_id: self.layer_id,
          });
          self.activation_loaded = false;
          self.bias_loaded = false;
          self.weight_loaded = false;
          self.state = AutoState::AllDone;
          log::info!("auto-sched: layer {} complete", self.layer_id);
        }
      },
      AutoState::AllDone => {
        if self.clear_ticks > 0 {
          out.clear_banks = true;
          self.clear_ticks -= 1;
          if self.clear_ticks == 0 && self.start_pending {
            // Clear pulse finished: release the held start
            self.start_pending = false;
            out.pass_start = true;
            self.weight_loaded = false;
            self.state = AutoState::Running;
            log::info!(
              "auto-sched: layer {} batch 0 started (full reload)",
              self.layer_id
            );
          }
          out.batch_id = self.batch_id;
          out.layer_id = self.layer_id;
        } else {
          out.need_activation = !self.activation_loaded;
          out.need_weight = !self.weight_loaded;
          out.need_bias = self.use_bias && !self.bias_loaded;
          // Layer transition fires exactly when every flag is set at once
          if self.full_set() && !inp.channel_busy {
            self.layer_id = layers.next_layer(self.layer_id);
            self.batch_id = 0;
            out.layer_id = self.layer_id;
            out.batch_id = 0;
            self.clear_ticks = 2;
            self.start_pending = true;
            out.clear_banks = true;
            self.clear_ticks -= 1;
          }
        }
      },
    }

    out
  }

  pub fn batch_id(&self) -> u32 {
    self.batch_id
  }

  pub fn layer_id(&self) -> u32 {
    self.layer_id
  }

  pub fn reset(&mut self) {
    self.state = AutoState::Idle;
    self.layer_id = 0;
    self.batch_id = 0;
    self.activation_loaded = false;
    self.weight_loaded = false;
    self.bias_loaded = false;
    self.prev_activation = false;
    self.prev_weight = false;
    self.prev_bias = false;
    self.clear_ticks = 0;
    self.start_pending = false;
  }
}
