//! Built-in stage implementations.
//!
//! Generic utilities for wiring and testing pipelines; none of them
//! interprets image data.

pub mod collector;
pub mod counter_source;
pub mod passthrough;
pub mod repeater;
pub mod scale;

pub use collector::{Collector, CollectorHandle};
pub use counter_source::CounterSource;
pub use passthrough::Passthrough;
pub use repeater::Repeater;
pub use scale::Scale;
