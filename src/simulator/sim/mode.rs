#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<String>,
  /// Stop after this many completed layers.
  pub layers: u64,
  /// Hard tick ceiling; 0 means unlimited.
  pub max_ticks: u64,
}
