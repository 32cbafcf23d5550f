//! Property access for stages.
//!
//! The core never interprets properties; it only forwards `set_property`
//! calls and applies named property sets when a reconfiguration reaches a
//! stage.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Configuration values that can be sent to stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats and integers both read as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view for properties that must be non-negative.
    pub fn expect_count(&self, name: &str) -> PipelineResult<u64> {
        match self.as_int() {
            Some(v) if v >= 0 => Ok(v as u64),
            _ => Err(PipelineError::InvalidProperty {
                name: name.to_string(),
                message: format!("expected a non-negative integer, got {}", self),
            }),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

/// Named collection of property assignments applied in one step.
pub type PropertySet = BTreeMap<String, PropertyValue>;

/// Name-based property access.
///
/// Every method has a default so stages without properties need no code.
/// Setters take `&self`: stages are shared with worker threads and keep
/// their settings behind interior mutability.
pub trait Configurable {
    fn property(&self, _name: &str) -> Option<PropertyValue> {
        None
    }

    fn set_property(&self, name: &str, _value: PropertyValue) -> PipelineResult<()> {
        Err(PipelineError::UnknownProperty(name.to_string()))
    }

    fn property_names(&self) -> &[&'static str] {
        &[]
    }
}

/// Apply every assignment of `set` in key order, stopping at the first failure.
pub fn apply_property_set(target: &dyn Configurable, set: &PropertySet) -> PipelineResult<()> {
    for (name, value) in set {
        target.set_property(name, value.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Threshold {
        level: Mutex<i64>,
    }

    impl Configurable for Threshold {
        fn property(&self, name: &str) -> Option<PropertyValue> {
            match name {
                "level" => Some(PropertyValue::Int(*self.level.lock())),
                _ => None,
            }
        }

        fn set_property(&self, name: &str, value: PropertyValue) -> PipelineResult<()> {
            match name {
                "level" => {
                    *self.level.lock() = value.expect_count(name)? as i64;
                    Ok(())
                }
                _ => Err(PipelineError::UnknownProperty(name.to_string())),
            }
        }
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_property_value_accessors() {
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::Int(42).as_int(), Some(42));
        assert_eq!(PropertyValue::Int(2).as_float(), Some(2.0));
        assert_eq!(PropertyValue::Float(3.14).as_float(), Some(3.14));
        assert_eq!(PropertyValue::String("hello".into()).as_str(), Some("hello"));
    }

    #[test]
    fn test_untagged_deserialization() {
        let set: PropertySet = toml::from_str("count = 10\nfactor = 0.5\nname = \"cam\"\nloop = true").unwrap();
        assert_eq!(set["count"], PropertyValue::Int(10));
        assert_eq!(set["factor"], PropertyValue::Float(0.5));
        assert_eq!(set["name"], PropertyValue::String("cam".into()));
        assert_eq!(set["loop"], PropertyValue::Bool(true));
    }

    #[test]
    fn test_apply_property_set() {
        let stage = Threshold::default();
        let mut set = PropertySet::new();
        set.insert("level".into(), PropertyValue::Int(12));
        apply_property_set(&stage, &set).unwrap();
        assert_eq!(stage.property("level"), Some(PropertyValue::Int(12)));

        set.insert("missing".into(), PropertyValue::Int(1));
        assert!(matches!(
            apply_property_set(&stage, &set),
            Err(PipelineError::UnknownProperty(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_negative_count_rejected() {
        let stage = Threshold::default();
        let err = stage.set_property("level", PropertyValue::Int(-1)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidProperty { .. }));
    }
}
