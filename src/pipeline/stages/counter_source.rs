//! CounterSource: producer of consecutive integers.
//!
//! Emits `count` `i64` objects starting at `start`, sleeping `interval_ms`
//! after each one, then finishes. Has no inputs, so it always runs as a
//! free-running producer.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::property::{Configurable, PropertyValue};
use crate::pipeline::socket::SocketDescriptor;
use crate::pipeline::stage::{ProcessOutcome, Stage, StageContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static SOCKETS: &[SocketDescriptor] = &[SocketDescriptor::output("out")];

static PROPERTIES: &[&str] = &["count", "start", "interval_ms", "emitted"];

#[derive(Debug, Clone, Copy)]
struct Settings {
    count: u64,
    start: i64,
    interval_ms: u64,
}

pub struct CounterSource {
    settings: Mutex<Settings>,
    /// Values emitted so far; each round emits the value its round number selects.
    emitted: AtomicU64,
}

impl CounterSource {
    pub fn new() -> Self {
        Self::with_count(10)
    }

    pub fn with_count(count: u64) -> Self {
        Self {
            settings: Mutex::new(Settings {
                count,
                start: 0,
                interval_ms: 0,
            }),
            emitted: AtomicU64::new(0),
        }
    }

    /// Number of values handed out so far in this run.
    pub fn emitted(&self) -> u64 {
        let count = self.settings.lock().count;
        self.emitted.load(Ordering::Acquire).min(count)
    }
}

impl Default for CounterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for CounterSource {
    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = *self.settings.lock();
        match name {
            "count" => Some(PropertyValue::Int(settings.count as i64)),
            "start" => Some(PropertyValue::Int(settings.start)),
            "interval_ms" => Some(PropertyValue::Int(settings.interval_ms as i64)),
            "emitted" => Some(PropertyValue::Int(self.emitted() as i64)),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        let mut settings = self.settings.lock();
        match name {
            "count" => settings.count = value.expect_count(name)?,
            "start" => {
                settings.start = value.as_int().ok_or_else(|| PipelineError::InvalidProperty {
                    name: name.to_string(),
                    message: format!("expected an integer, got {}", value),
                })?
            }
            "interval_ms" => settings.interval_ms = value.expect_count(name)?,
            "emitted" => {
                return Err(PipelineError::InvalidProperty {
                    name: name.to_string(),
                    message: "read-only".to_string(),
                })
            }
            _ => return Err(PipelineError::UnknownProperty(name.to_string())),
        }
        Ok(())
    }

    fn property_names(&self) -> &[&'static str] {
        PROPERTIES
    }
}

impl Stage for CounterSource {
    fn class_name(&self) -> &'static str {
        "CounterSource"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn check(&self, _ctx: &StageContext, reset: bool) -> PipelineResult<()> {
        if reset {
            self.emitted.store(0, Ordering::Release);
        }
        Ok(())
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        let settings = *self.settings.lock();
        let index = ctx.round();
        if index >= settings.count {
            return Ok(ProcessOutcome::Finished);
        }
        ctx.emit(0, settings.start + index as i64)?;
        self.emitted.fetch_max(index + 1, Ordering::AcqRel);
        if settings.interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(settings.interval_ms));
        }
        Ok(ProcessOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::socket::{InputSocket, OutputSocket};

    #[test]
    fn test_emits_count_values_then_finishes() {
        let source = CounterSource::with_count(2);
        source.set_property("start", PropertyValue::Int(40)).unwrap();
        let output = OutputSocket::new("out");
        let sink = InputSocket::detached("sink", 4);
        output.connect(&sink);
        let outputs = vec![output];
        let ctx = |round| StageContext::new("src", NodeId(5), &[], &outputs, 0).with_round(round);

        assert!(matches!(source.process(&ctx(0)), Ok(ProcessOutcome::Continue)));
        assert!(matches!(source.process(&ctx(1)), Ok(ProcessOutcome::Continue)));
        assert!(matches!(source.process(&ctx(2)), Ok(ProcessOutcome::Finished)));
        let values: Vec<i64> = sink
            .queued()
            .iter()
            .filter_map(|v| v.downcast_ref::<i64>().copied())
            .collect();
        assert_eq!(values, vec![40, 41]);
        assert_eq!(source.property("emitted"), Some(PropertyValue::Int(2)));

        source.check(&ctx(0), true).unwrap();
        assert_eq!(source.emitted(), 0);
    }

    #[test]
    fn test_value_follows_round_number() {
        let source = CounterSource::with_count(10);
        let output = OutputSocket::new("out");
        let sink = InputSocket::detached("sink", 4);
        output.connect(&sink);
        let outputs = vec![output];

        // Rounds completing out of order still emit the value of their own round.
        for round in [3, 1, 2] {
            let ctx = StageContext::new("src", NodeId(9), &[], &outputs, 0).with_round(round);
            assert!(matches!(source.process(&ctx), Ok(ProcessOutcome::Continue)));
        }
        let values: Vec<i64> = sink
            .queued()
            .iter()
            .filter_map(|v| v.downcast_ref::<i64>().copied())
            .collect();
        assert_eq!(values, vec![3, 1, 2]);
        assert_eq!(source.emitted(), 4);
    }

    #[test]
    fn test_rejects_negative_count() {
        let source = CounterSource::new();
        assert!(matches!(
            source.set_property("count", PropertyValue::Int(-1)),
            Err(PipelineError::InvalidProperty { .. })
        ));
        assert!(source.set_property("emitted", PropertyValue::Int(1)).is_err());
    }
}
