pub mod accumulator;
pub mod arbiter;
pub mod auto_scheduler;
pub mod axon;
pub mod bank;
pub mod lanes;
pub mod layer;
pub mod loader;
pub mod mapper;
pub mod pass_scheduler;

pub use axon::{Axon, AxonConfig, TickReport};
