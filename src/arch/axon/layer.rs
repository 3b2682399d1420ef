use serde::{Deserialize, Serialize};

// Array geometry (fixed by the lane/bank fabric)
pub const LANES: usize = 16;
pub const BANKS: usize = 16;
pub const KERNEL_SIZE: u32 = 4;
pub const CHANNELS_PER_TILE: u32 = 4;
pub const STRIDE: u32 = 2;
pub const PADDING: u32 = 1;

// Bank depths (words per bank)
pub const OUT_BANK_DEPTH: u32 = 512;
pub const ACT_BANK_DEPTH: u32 = 512;
pub const WT_BANK_DEPTH: u32 = 1024;
// Weight storage is split into 4 contiguous bands, one per tile of a batch
pub const WT_TILE_BAND: u32 = 256;
pub const WT_BANDS: u32 = 4;

/// Address driven for lanes whose result falls outside the output tensor.
/// Never written: the valid bit gates the write, this value is only what
/// shows up on the address lines.
pub const SENTINEL_ADDR: u32 = OUT_BANK_DEPTH - 1;

/// One transposed-convolution layer's configuration.
///
/// All per-layer control decisions (pass decoding, address windows,
/// iteration counts, batch ceilings) derive from these six numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
  pub input_rows: u32,
  pub input_channels: u32,
  pub output_length: u32,
  pub output_channels: u32,
  pub tile_count: u32,
  pub batches_for_layer: u32,
}

impl LayerConfig {
  /// Tiles processed per batch under one weight load.
  pub fn tiles_per_batch(&self) -> u32 {
    self.tile_count / self.batches_for_layer
  }

  /// Words per activation bank occupied by one input row.
  pub fn activation_band(&self) -> u32 {
    self.input_channels / BANKS as u32
  }

  /// Number of row-sized bands the activation banks partition into.
  pub fn activation_band_count(&self) -> u32 {
    ACT_BANK_DEPTH / self.input_rows
  }

  /// Lane-array iteration count: one tick per input channel.
  pub fn compute_iterations(&self) -> u32 {
    self.input_channels
  }

  /// Passes in one batch: every row of every tile in the batch.
  pub fn passes_per_batch(&self) -> u32 {
    self.tiles_per_batch() * self.input_rows
  }

  /// Output-bank pages in use (output_channels / 16, rounded up).
  pub fn output_pages(&self) -> u32 {
    (self.output_channels + BANKS as u32 - 1) / BANKS as u32
  }

  /// Words per output bank holding live data for this layer.
  pub fn output_words_per_bank(&self) -> u32 {
    self.output_pages() * self.output_length
  }
}

/// The built-in layer stack: the generator's three upsampling layers.
/// Each halves the channel count and doubles the temporal length
/// (stride 2, padding 1, kernel 4).
pub const LAYER_TABLE: [LayerConfig; 3] = [
  LayerConfig {
    input_rows: 32,
    input_channels: 256,
    output_length: 64,
    output_channels: 128,
    tile_count: 32,
    batches_for_layer: 8,
  },
  LayerConfig {
    input_rows: 64,
    input_channels: 128,
    output_length: 128,
    output_channels: 64,
    tile_count: 16,
    batches_for_layer: 4,
  },
  LayerConfig {
    input_rows: 128,
    input_channels: 64,
    output_length: 256,
    output_channels: 4,
    tile_count: 1,
    batches_for_layer: 1,
  },
];

/// Layer lookup table. Ids outside the table fall back to entry 0 rather
/// than halting (no abort path exists in the core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerTable {
  layers: Vec<LayerConfig>,
}

impl Default for LayerTable {
  fn default() -> Self {
    Self {
      layers: LAYER_TABLE.to_vec(),
    }
  }
}

impl LayerTable {
  pub fn new(layers: Vec<LayerConfig>) -> Self {
    if layers.is_empty() {
      return Self::default();
    }
    Self { layers }
  }

  pub fn get(&self, layer_id: u32) -> &LayerConfig {
    self
      .layers
      .get(layer_id as usize)
      .unwrap_or_else(|| &self.layers[0])
  }

  pub fn len(&self) -> u32 {
    self.layers.len() as u32
  }

  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Next layer id, wrapping over the table.
  pub fn next_layer(&self, layer_id: u32) -> u32 {
    (layer_id + 1) % self.len()
  }

  /// Batch ceiling for a layer.
  pub fn batch_ceiling(&self, layer_id: u32) -> u32 {
    self.get(layer_id).batches_for_layer
  }
}
