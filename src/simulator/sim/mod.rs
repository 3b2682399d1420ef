pub mod mode;
pub mod shell;

pub use mode::{SimConfig, StepMode};
