//! Infrastructure layer: queue storage backends, queue services and their config.

pub mod config;
pub mod queue;
