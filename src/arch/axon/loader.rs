use super::bank::Storage;
use super::layer::{LayerConfig, BANKS, CHANNELS_PER_TILE, KERNEL_SIZE, LANES, WT_TILE_BAND};

/// Default transfer latency in ticks, standing in for the byte-stream
/// front end that fills the operand banks.
pub const TRANSFER_LATENCY: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
  Idle,
  Busy(u32),
  Done,
}

/// One loader handshake channel (activation, weight or bias).
///
/// The complete signal is a level that rises a fixed latency after the
/// request and falls when the request is withdrawn, so the consumer's
/// edge detector sees a fresh rise for every transfer.
#[derive(Debug)]
pub struct LoaderChannel {
  state: ChannelState,
  latency: u32,
}

impl LoaderChannel {
  pub fn new(latency: u32) -> Self {
    Self {
      state: ChannelState::Idle,
      latency,
    }
  }

  /// Advance one tick under the consumer's request level; returns the
  /// complete level.
  pub fn step(&mut self, requested: bool) -> bool {
    match self.state {
      ChannelState::Idle => {
        if requested {
          self.state = if self.latency == 0 {
            ChannelState::Done
          } else {
            ChannelState::Busy(self.latency)
          };
        }
        false
      },
      ChannelState::Busy(ticks) => {
        self.state = if ticks == 1 {
          ChannelState::Done
        } else {
          ChannelState::Busy(ticks - 1)
        };
        matches!(self.state, ChannelState::Done)
      },
      ChannelState::Done => {
        if !requested {
          self.state = ChannelState::Idle;
          return false;
        }
        true
      },
    }
  }

  pub fn reset(&mut self) {
    self.state = ChannelState::Idle;
  }
}

/// Request levels from the scheduler, one per operand channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderRequests {
  pub activation: bool,
  pub weight: bool,
  pub bias: bool,
}

/// Complete levels back to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderComplete {
  pub activation: bool,
  pub weight: bool,
  pub bias: bool,
}

/// The three operand transfer channels. Data movement itself is outside
/// this model; callers stage operands into `Storage` directly and this
/// front end supplies only the handshake timing.
#[derive(Debug)]
pub struct LoaderFrontEnd {
  activation: LoaderChannel,
  weight: LoaderChannel,
  bias: LoaderChannel,
}

impl LoaderFrontEnd {
  pub fn new(latency: u32) -> Self {
    Self {
      activation: LoaderChannel::new(latency),
      weight: LoaderChannel::new(latency),
      bias: LoaderChannel::new(latency),
    }
  }

  pub fn step(&mut self, req: &LoaderRequests) -> LoaderComplete {
    LoaderComplete {
      activation: self.activation.step(req.activation),
      weight: self.weight.step(req.weight),
      bias: self.bias.step(req.bias),
    }
  }

  pub fn reset(&mut self) {
    self.activation.reset();
    self.weight.reset();
    self.bias.reset();
  }
}

/// Stage the whole input feature map: channel c of row r lands in bank
/// c % 16 at address r * band + c / 16.
pub fn stage_activations<F>(act: &mut Storage, layer: &LayerConfig, value: F)
where
  F: Fn(u32, u32) -> i32,
{
  let band = layer.activation_band();
  for row in 0..layer.input_rows {
    for ch in 0..layer.input_channels {
      act.write(
        ch as usize % BANKS,
        row * band + ch / BANKS as u32,
        value(ch, row),
      );
    }
  }
}

/// Stage one batch's weights. Lane L of tile band tb holds the kernel tap
/// L % 4 of output channel (batch * tiles_per_batch + tb) * 4 + L / 4,
/// one word per input channel.
pub fn stage_weights<F>(wt: &mut Storage, layer: &LayerConfig, batch_id: u32, value: F)
where
  F: Fn(u32, u32, u32) -> i32,
{
  for tile_band in 0..layer.tiles_per_batch() {
    let tile_id = batch_id * layer.tiles_per_batch() + tile_band;
    for lane in 0..LANES as u32 {
      let out_ch = tile_id * CHANNELS_PER_TILE + lane / KERNEL_SIZE;
      let tap = lane % KERNEL_SIZE;
      for ch in 0..layer.input_channels {
        wt.write(
          lane as usize,
          tile_band * WT_TILE_BAND + ch,
          value(out_ch, ch, tap),
        );
      }
    }
  }
}
