use super::accumulator::LaneEvent;
use super::bank::Storage;
use super::layer::{BANKS, LANES};

/// Start pulses and operand windows driven by the pass scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneInputs {
  /// Latch the operand windows for the coming pass.
  pub load_start: bool,
  /// First activation word per bank for the pass's input row.
  pub act_base: u32,
  /// First weight word per lane for the pass's tile.
  pub wt_base: u32,
  /// Begin the multiply-accumulate sweep.
  pub compute_start: bool,
  /// Input channels to sweep: one per tick.
  pub iterations: u32,
}

/// Per-tick lane-array outputs: at most one result event, plus the running
/// done counter the pass scheduler polls.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneOutputs {
  pub event: Option<LaneEvent>,
  pub done_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneState {
  Idle,
  Computing { channel: u32 },
  Emitting { index: u8 },
}

/// The 16-lane multiply-accumulate array.
///
/// Functional model of the compute fabric's load/compute/emit surface: one
/// input channel per tick during compute, then one lane result per tick in
/// tap-major order (lanes 0,4,8,12, 1,5,9,13, ...) so that results sharing
/// an output bank leave four ticks apart.
///
/// Lane L holds the weights of (channel_offset L/4, kernel_tap L%4) for the
/// current tile; the activation word of input channel c is broadcast from
/// bank c%16 at address act_base + c/16.
#[derive(Debug)]
pub struct LaneArray {
  state: LaneState,
  acc: [i64; LANES],
  act_base: u32,
  wt_base: u32,
  iterations: u32,
  done_count: u8,
}

impl LaneArray {
  pub fn new() -> Self {
    Self {
      state: LaneState::Idle,
      acc: [0; LANES],
      act_base: 0,
      wt_base: 0,
      iterations: 0,
      done_count: 0,
    }
  }

  pub fn step(&mut self, inp: &LaneInputs, act: &Storage, wt: &Storage) -> LaneOutputs {
    let mut out = LaneOutputs {
      event: None,
      done_count: self.done_count,
    };

    if inp.load_start {
      self.act_base = inp.act_base;
      self.wt_base = inp.wt_base;
      self.acc = [0; LANES];
      self.done_count = 0;
      out.done_count = 0;
      self.state = LaneState::Idle;
    }

    if inp.compute_start {
      self.iterations = inp.iterations;
      self.done_count = 0;
      out.done_count = 0;
      self.state = LaneState::Computing { channel: 0 };
      return out;
    }

    match self.state {
      LaneState::Idle => {},
      LaneState::Computing { channel } => {
        let bank = channel as usize % BANKS;
        let offset = channel / BANKS as u32;
        let act_val = act.read(bank, self.act_base + offset) as i64;
        for (lane, acc) in self.acc.iter_mut().enumerate() {
          let wt_val = wt.read(lane, self.wt_base + channel) as i64;
          *acc += act_val * wt_val;
        }
        if channel + 1 == self.iterations {
          self.state = LaneState::Emitting { index: 0 };
        } else {
          self.state = LaneState::Computing { channel: channel + 1 };
        }
      },
      LaneState::Emitting { index } => {
        let tap = index / 4;
        let offset = index % 4;
        let lane = offset * 4 + tap;
        out.event = Some(LaneEvent {
          lane_id: lane,
          value: self.acc[lane as usize],
          valid: true,
        });
        self.done_count += 1;
        out.done_count = self.done_count;
        if index + 1 == LANES as u8 {
          self.state = LaneState::Idle;
        } else {
          self.state = LaneState::Emitting { index: index + 1 };
        }
      },
    }

    out
  }

  pub fn reset(&mut self) {
    self.state = LaneState::Idle;
    self.acc = [0; LANES];
    self.done_count = 0;
  }
}
