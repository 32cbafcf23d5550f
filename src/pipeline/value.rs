//! Values exchanged between stages.
//!
//! A `Value` is either an ordinary object (an opaque, reference-counted,
//! type-tagged payload) or one of the control tags that travel through the
//! same queues: synchronization start/end, stop, pause, resume and
//! reconfigure. Values are immutable once queued; cloning only bumps a
//! reference count.

use std::any::Any;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

/// Opaque payload produced and consumed by stages.
#[derive(Clone)]
pub struct Object {
    data: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Object {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            data: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap an already shared payload without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            data: value,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.data.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Shared handle to the payload if it has type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone().downcast::<T>().ok()
    }

    /// Whether both objects share the same allocation.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object<{}>", self.type_name)
    }
}

/// Flow-level and delay counters carried by a resume tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeState {
    /// Net number of open `start_many` brackets.
    pub flow_level: i32,
    /// Net number of open `start_delay` brackets.
    pub delay: i32,
}

impl ResumeState {
    pub const fn new(flow_level: i32, delay: i32) -> Self {
        Self { flow_level, delay }
    }
}

impl Add for ResumeState {
    type Output = ResumeState;

    fn add(self, rhs: ResumeState) -> ResumeState {
        ResumeState {
            flow_level: self.flow_level + rhs.flow_level,
            delay: self.delay + rhs.delay,
        }
    }
}

/// One entry of an input queue.
#[derive(Clone)]
pub enum Value {
    Object(Object),
    /// Synchronization start marker.
    Start,
    /// Synchronization end marker.
    End,
    Stop,
    Pause,
    Resume(ResumeState),
    /// Apply the cached property set with this name.
    Reconfigure(Arc<str>),
}

/// Discriminant of a `Value`, used for queue searches and type masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Object,
    Start,
    End,
    Stop,
    Pause,
    Resume,
    Reconfigure,
}

impl Value {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Object::new(value))
    }

    pub fn reconfigure(name: &str) -> Self {
        Value::Reconfigure(Arc::from(name))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Object(_) => ValueKind::Object,
            Value::Start => ValueKind::Start,
            Value::End => ValueKind::End,
            Value::Stop => ValueKind::Stop,
            Value::Pause => ValueKind::Pause,
            Value::Resume(_) => ValueKind::Resume,
            Value::Reconfigure(_) => ValueKind::Reconfigure,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_tag(&self) -> bool {
        !self.is_object()
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(|obj| obj.downcast_ref::<T>())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Object(obj) => fmt::Debug::fmt(obj, f),
            Value::Start => write!(f, "StartTag"),
            Value::End => write!(f, "EndTag"),
            Value::Stop => write!(f, "StopTag"),
            Value::Pause => write!(f, "PauseTag"),
            Value::Resume(state) => write!(
                f,
                "ResumeTag(flow_level={}, delay={})",
                state.flow_level, state.delay
            ),
            Value::Reconfigure(name) => write!(f, "ReconfigureTag({})", name),
        }
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_downcast() {
        let value = Value::object(42i64);
        assert_eq!(value.kind(), ValueKind::Object);
        assert_eq!(value.downcast_ref::<i64>(), Some(&42));
        assert!(value.downcast_ref::<f64>().is_none());

        let obj = value.as_object().unwrap();
        assert!(obj.is::<i64>());
        assert_eq!(*obj.downcast::<i64>().unwrap(), 42);
        assert_eq!(obj.type_name(), "i64");
    }

    #[test]
    fn test_clone_shares_payload() {
        let value = Value::object(vec![1u8, 2, 3]);
        let copy = value.clone();
        assert!(value.as_object().unwrap().ptr_eq(copy.as_object().unwrap()));
    }

    #[test]
    fn test_tag_kinds() {
        assert_eq!(Value::Start.kind(), ValueKind::Start);
        assert_eq!(Value::End.kind(), ValueKind::End);
        assert_eq!(Value::Stop.kind(), ValueKind::Stop);
        assert_eq!(Value::Pause.kind(), ValueKind::Pause);
        assert_eq!(Value::Resume(ResumeState::default()).kind(), ValueKind::Resume);
        assert_eq!(Value::reconfigure("fast").kind(), ValueKind::Reconfigure);
        assert!(Value::Stop.is_tag());
    }

    #[test]
    fn test_resume_state_sum() {
        let sum = ResumeState::new(1, 0) + ResumeState::new(2, 1);
        assert_eq!(sum, ResumeState::new(3, 1));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Value::Resume(ResumeState::new(2, 1))), "ResumeTag(flow_level=2, delay=1)");
        assert_eq!(format!("{:?}", Value::reconfigure("night")), "ReconfigureTag(night)");
    }
}
