//! Shorthand constructors for stages used across tests

use std::sync::Arc;
use visionflow::pipeline::stage::BuiltinStage;
use visionflow::pipeline::stages::{Collector, CollectorHandle, CounterSource, Passthrough};
use visionflow::pipeline::PropertyValue;
use visionflow::{ProcessingMode, StageNode};

/// Threaded producer of `0..count`, sleeping `interval_ms` between values
pub fn counter(name: &str, count: u64, interval_ms: i64) -> Arc<StageNode> {
    let node = StageNode::new(
        name,
        BuiltinStage::CounterSource(CounterSource::with_count(count)),
        ProcessingMode::Threaded,
    );
    if interval_ms > 0 {
        node.set_property("interval_ms", PropertyValue::Int(interval_ms))
            .unwrap();
    }
    node
}

/// Producer of `0..count` scheduled with `mode`
pub fn counter_in(name: &str, count: u64, mode: ProcessingMode) -> Arc<StageNode> {
    StageNode::new(
        name,
        BuiltinStage::CounterSource(CounterSource::with_count(count)),
        mode,
    )
}

pub fn passthrough(name: &str, mode: ProcessingMode) -> Arc<StageNode> {
    StageNode::new(name, BuiltinStage::Passthrough(Passthrough::new()), mode)
}

/// Inline collector plus the handle to inspect what it received
pub fn collector(name: &str) -> (Arc<StageNode>, CollectorHandle) {
    let collector = Collector::new();
    let handle = collector.handle();
    let node = StageNode::new(name, BuiltinStage::Collector(collector), ProcessingMode::Inline);
    (node, handle)
}
