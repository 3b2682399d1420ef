use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::layer::{
  LayerConfig, BANKS, CHANNELS_PER_TILE, KERNEL_SIZE, LANES, PADDING, SENTINEL_ADDR, STRIDE,
};

/// Where one lane's result lands in the output banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneMapping {
  pub valid: bool,
  pub bank_id: u8,
  pub bank_address: u32,
}

/// Immutable per-pass mapping table. Created once per pass and shared by
/// reference for the pass's full accumulation drain; never mutated while
/// in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub row_id: u32,
  pub tile_id: u32,
  pub layer_id: u32,
  pub lanes: [LaneMapping; LANES],
}

/// The scatter pattern of the transposed convolution: pure in
/// (row, tile, layer), so identical inputs always reproduce identical
/// mappings.
pub fn map_pass(row_id: u32, tile_id: u32, layer_id: u32, layer: &LayerConfig) -> Snapshot {
  let mut lanes = [LaneMapping {
    valid: false,
    bank_id: 0,
    bank_address: SENTINEL_ADDR,
  }; LANES];

  for (lane, mapping) in lanes.iter_mut().enumerate() {
    let kernel_tap = lane as u32 % KERNEL_SIZE;
    let channel_offset = lane as u32 / KERNEL_SIZE;
    let output_channel = tile_id * CHANNELS_PER_TILE + channel_offset;
    let output_time = row_id as i64 * STRIDE as i64 - PADDING as i64 + kernel_tap as i64;

    let valid = tile_id < layer.tile_count
      && output_channel < layer.output_channels
      && output_time >= 0
      && (output_time as u32) < layer.output_length;

    if valid {
      let bank_page = output_channel / BANKS as u32;
      mapping.valid = true;
      mapping.bank_id = (output_channel % BANKS as u32) as u8;
      mapping.bank_address = bank_page * layer.output_length + output_time as u32;
    }
  }

  Snapshot {
    row_id,
    tile_id,
    layer_id,
    lanes,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapperState {
  Idle,
  Settling(u8),
  DonePulse,
}

/// Start-pulse inputs to the mapper, driven by the pass scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapperRequest {
  pub start: bool,
  pub row_id: u32,
  pub tile_id: u32,
  pub layer_id: u32,
}

/// Mapper outputs for one tick. `snapshot` holds the most recently
/// stabilized table; `done` pulses for exactly one tick, one tick after
/// stabilization.
#[derive(Debug, Clone, Default)]
pub struct MapperOutputs {
  pub done: bool,
  pub snapshot: Option<Arc<Snapshot>>,
}

/// Latency wrapper around `map_pass`: the result stabilizes two ticks
/// after the request pulse.
#[derive(Debug)]
pub struct AddressMapper {
  state: MapperState,
  request: MapperRequest,
  snapshot: Option<Arc<Snapshot>>,
}

impl AddressMapper {
  pub fn new() -> Self {
    Self {
      state: MapperState::Idle,
      request: MapperRequest::default(),
      snapshot: None,
    }
  }

  pub fn step(&mut self, req: &MapperRequest, layer: &LayerConfig) -> MapperOutputs {
    let mut out = MapperOutputs {
      done: false,
      snapshot: self.snapshot.clone(),
    };

    match self.state {
      MapperState::Idle => {
        if req.start {
          self.request = *req;
          self.state = MapperState::Settling(2);
        }
      },
      MapperState::Settling(ticks) => {
        let remaining = ticks - 1;
        if remaining == 0 {
          let snap = map_pass(
            self.request.row_id,
            self.request.tile_id,
            self.request.layer_id,
            layer,
          );
          log::debug!(
            "mapper: pass (row={}, tile={}, layer={}) stabilized",
            snap.row_id,
            snap.tile_id,
            snap.layer_id
          );
          self.snapshot = Some(Arc::new(snap));
          out.snapshot = self.snapshot.clone();
          self.state = MapperState::DonePulse;
        } else {
          self.state = MapperState::Settling(remaining);
        }
      },
      MapperState::DonePulse => {
        out.done = true;
        self.state = MapperState::Idle;
      },
    }

    out
  }

  pub fn reset(&mut self) {
    self.state = MapperState::Idle;
    self.snapshot = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::layer::LayerTable;

  fn test_layer() -> LayerConfig {
    // out_len 64, out_ch 128, tiles 32
    *LayerTable::default().get(0)
  }

  #[test]
  fn mapping_is_pure_and_idempotent() {
    let layer = test_layer();
    let a = map_pass(7, 3, 0, &layer);
    let b = map_pass(7, 3, 0, &layer);
    assert_eq!(a, b);
  }

  #[test]
  fn row0_tile0_scatter_pattern() {
    let layer = test_layer();
    let snap = map_pass(0, 0, 0, &layer);

    // tap 0 lanes fall at output_time -1: invalid
    for lane in [0, 4, 8, 12] {
      assert!(!snap.lanes[lane].valid, "lane {} should be invalid", lane);
      assert_eq!(snap.lanes[lane].bank_address, SENTINEL_ADDR);
    }
    // taps 1..3 land at times 0..2
    for (taps, time) in [([1, 5, 9, 13], 0), ([2, 6, 10, 14], 1), ([3, 7, 11, 15], 2)] {
      for (offset, lane) in taps.iter().enumerate() {
        let m = snap.lanes[*lane];
        assert!(m.valid);
        assert_eq!(m.bank_id as usize, offset); // channels 0..3 for tile 0
        assert_eq!(m.bank_address, time);
      }
    }
  }

  #[test]
  fn out_of_range_tile_and_channel_invalidate_lanes() {
    let layer = test_layer();
    let snap = map_pass(1, layer.tile_count, 0, &layer);
    assert!(snap.lanes.iter().all(|m| !m.valid));

    // Last valid tile of a layer whose channel count is not a tile multiple
    let narrow = LayerConfig {
      output_channels: 6,
      tile_count: 2,
      ..layer
    };
    let snap = map_pass(1, 1, 0, &narrow);
    // channels 4,5 valid; 6,7 out of range
    assert!(snap.lanes[0].valid);
    assert!(snap.lanes[4].valid);
    assert!(!snap.lanes[8].valid);
    assert!(!snap.lanes[12].valid);
  }

  #[test]
  fn bank_paging_beyond_16_channels() {
    let layer = test_layer();
    // tile 4 covers channels 16..19: page 1, banks 0..3
    let snap = map_pass(1, 4, 0, &layer);
    let m = snap.lanes[1]; // channel_offset 0, tap 1 -> time 1*2-1+1 = 2
    assert!(m.valid);
    assert_eq!(m.bank_id, 0);
    assert_eq!(m.bank_address, layer.output_length + 2);
  }

  #[test]
  fn settle_and_done_timing() {
    let layer = test_layer();
    let mut mapper = AddressMapper::new();

    let req = MapperRequest {
      start: true,
      row_id: 1,
      tile_id: 0,
      layer_id: 0,
    };
    let idle = MapperRequest::default();

    // T: request accepted, nothing stable yet
    let out = mapper.step(&req, &layer);
    assert!(out.snapshot.is_none() && !out.done);
    // T+1: still settling
    let out = mapper.step(&idle, &layer);
    assert!(out.snapshot.is_none() && !out.done);
    // T+2: stabilized, done not yet
    let out = mapper.step(&idle, &layer);
    assert!(out.snapshot.is_some() && !out.done);
    // T+3: done pulse
    let out = mapper.step(&idle, &layer);
    assert!(out.done);
    // T+4: pulse dropped, snapshot persists
    let out = mapper.step(&idle, &layer);
    assert!(!out.done && out.snapshot.is_some());
  }
}
