//! Scale: multiplies numeric objects by a constant factor.
//!
//! `i64` inputs stay integers (rounded to nearest), `f64` inputs stay
//! floats. Any other object type is a processing error.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::property::{Configurable, PropertyValue};
use crate::pipeline::socket::SocketDescriptor;
use crate::pipeline::stage::{ProcessOutcome, Stage, StageContext};
use crate::pipeline::value::Value;
use parking_lot::Mutex;

static SOCKETS: &[SocketDescriptor] = &[
    SocketDescriptor::input("in"),
    SocketDescriptor::output("out"),
];

static PROPERTIES: &[&str] = &["factor"];

pub struct Scale {
    factor: Mutex<f64>,
}

impl Scale {
    pub fn new() -> Self {
        Self::with_factor(1.0)
    }

    pub fn with_factor(factor: f64) -> Self {
        Self {
            factor: Mutex::new(factor),
        }
    }

    pub fn factor(&self) -> f64 {
        *self.factor.lock()
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurable for Scale {
    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "factor" => Some(PropertyValue::Float(self.factor())),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
        match name {
            "factor" => {
                let factor = value.as_float().ok_or_else(|| PipelineError::InvalidProperty {
                    name: name.to_string(),
                    message: format!("expected a number, got {}", value),
                })?;
                *self.factor.lock() = factor;
                Ok(())
            }
            _ => Err(PipelineError::UnknownProperty(name.to_string())),
        }
    }

    fn property_names(&self) -> &[&'static str] {
        PROPERTIES
    }
}

impl Stage for Scale {
    fn class_name(&self) -> &'static str {
        "Scale"
    }

    fn sockets(&self) -> &[SocketDescriptor] {
        SOCKETS
    }

    fn process(&self, ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
        let factor = self.factor();
        let value = ctx.value(0)?;
        let scaled = if let Some(v) = value.downcast_ref::<i64>() {
            Value::object((*v as f64 * factor).round() as i64)
        } else if let Some(v) = value.downcast_ref::<f64>() {
            Value::object(v * factor)
        } else {
            let found = value
                .as_object()
                .map(|obj| obj.type_name().to_string())
                .unwrap_or_else(|| format!("{:?}", value));
            return Err(ctx.error(format!("cannot scale a {}", found)));
        };
        ctx.send(0, scaled)?;
        Ok(ProcessOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::socket::{InputSocket, OutputSocket};

    fn run(stage: &Scale, value: Value) -> PipelineResult<Option<Value>> {
        let input = InputSocket::detached("in", 1);
        input.enqueue(value);
        input.advance();
        let output = OutputSocket::new("out");
        let sink = InputSocket::detached("sink", 1);
        output.connect(&sink);
        let inputs = vec![input];
        let outputs = vec![output];
        let ctx = StageContext::new("scale", NodeId(4), &inputs, &outputs, 0);
        stage.process(&ctx)?;
        Ok(sink.head())
    }

    #[test]
    fn test_scales_integers_and_floats() {
        let stage = Scale::with_factor(2.5);
        let int = run(&stage, Value::object(3i64)).unwrap().unwrap();
        assert_eq!(int.downcast_ref::<i64>(), Some(&8));
        let float = run(&stage, Value::object(2.0f64)).unwrap().unwrap();
        assert_eq!(float.downcast_ref::<f64>(), Some(&5.0));
    }

    #[test]
    fn test_rejects_other_objects() {
        let stage = Scale::new();
        match run(&stage, Value::object("text")) {
            Err(PipelineError::Processing { stage, message, .. }) => {
                assert_eq!(stage, "scale");
                assert!(message.contains("&str"));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_factor_property() {
        let stage = Scale::new();
        stage.set_property("factor", PropertyValue::Int(3)).unwrap();
        assert_eq!(stage.property("factor"), Some(PropertyValue::Float(3.0)));
        assert!(matches!(
            stage.set_property("factor", PropertyValue::Bool(true)),
            Err(PipelineError::InvalidProperty { .. })
        ));
        assert!(stage.set_property("gain", PropertyValue::Int(1)).is_err());
    }
}
