//! Stage class registry.
//!
//! Maps class names used in pipeline files to factories. The registry is an
//! ordinary value handed to the builder; there is no process-wide table.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::stage::{AnyStage, BuiltinStage, Stage};
use crate::pipeline::stages::{Collector, CounterSource, Passthrough, Repeater, Scale};
use std::collections::BTreeMap;

/// Creates a fresh stage instance.
pub type StageFactory = Box<dyn Fn() -> AnyStage + Send + Sync>;

struct Registration {
    description: &'static str,
    factory: StageFactory,
}

/// Class name → factory.
#[derive(Default)]
pub struct StageRegistry {
    classes: BTreeMap<String, Registration>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in stage class.
    pub fn with_builtin_stages() -> Self {
        let mut registry = Self::new();
        registry.register(
            "CounterSource",
            "Emits `count` consecutive integers from `start`.\n\
             Sleeps `interval_ms` between values, then finishes.",
            || BuiltinStage::CounterSource(CounterSource::new()).into(),
        );
        registry.register(
            "Passthrough",
            "Forwards every input object unchanged.",
            || BuiltinStage::Passthrough(Passthrough::new()).into(),
        );
        registry.register(
            "Scale",
            "Multiplies integer and float objects by `factor`.",
            || BuiltinStage::Scale(Scale::new()).into(),
        );
        registry.register(
            "Repeater",
            "Emits each input object `times` times.\n\
             Repetitions are bracketed by start/end tags.",
            || BuiltinStage::Repeater(Repeater::new()).into(),
        );
        registry.register(
            "Collector",
            "Records every object and synchronization event it receives.",
            || BuiltinStage::Collector(Collector::new()).into(),
        );
        registry
    }

    /// Register `class`, replacing an earlier registration of the same name.
    pub fn register<F>(&mut self, class: impl Into<String>, description: &'static str, factory: F)
    where
        F: Fn() -> AnyStage + Send + Sync + 'static,
    {
        let class = class.into();
        if self.classes.contains_key(&class) {
            tracing::warn!("Stage class '{}' registered twice; keeping the latest", class);
        }
        self.classes.insert(
            class,
            Registration {
                description,
                factory: Box::new(factory),
            },
        );
    }

    /// Register a user stage type constructed with `Default`.
    pub fn register_plugin<S>(&mut self, class: impl Into<String>, description: &'static str)
    where
        S: Stage + Default + 'static,
    {
        self.register(class, description, || AnyStage::plugin(S::default()));
    }

    pub fn create(&self, class: &str) -> PipelineResult<AnyStage> {
        self.classes
            .get(class)
            .map(|registration| (registration.factory)())
            .ok_or_else(|| PipelineError::UnknownClass(class.to_string()))
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        self.classes.keys().map(String::as_str).collect()
    }

    pub fn description(&self, class: &str) -> Option<&'static str> {
        self.classes.get(class).map(|r| r.description)
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::property::Configurable;
    use crate::pipeline::socket::SocketDescriptor;
    use crate::pipeline::stage::{ProcessOutcome, StageContext};

    #[test]
    fn test_builtin_classes() {
        let registry = StageRegistry::with_builtin_stages();
        assert_eq!(
            registry.class_names(),
            vec!["Collector", "CounterSource", "Passthrough", "Repeater", "Scale"]
        );
        let stage = registry.create("Scale").unwrap();
        assert_eq!(stage.class_name(), "Scale");
        assert!(registry.description("Repeater").unwrap().contains("times"));
    }

    #[test]
    fn test_unknown_class() {
        let registry = StageRegistry::new();
        assert!(matches!(
            registry.create("Blur"),
            Err(PipelineError::UnknownClass(name)) if name == "Blur"
        ));
    }

    #[derive(Default)]
    struct Dropper;

    impl Configurable for Dropper {}

    impl Stage for Dropper {
        fn class_name(&self) -> &'static str {
            "Dropper"
        }

        fn sockets(&self) -> &[SocketDescriptor] {
            static SOCKETS: &[SocketDescriptor] = &[SocketDescriptor::input("in")];
            SOCKETS
        }

        fn process(&self, _ctx: &StageContext) -> PipelineResult<ProcessOutcome> {
            Ok(ProcessOutcome::Continue)
        }
    }

    #[test]
    fn test_plugin_registration() {
        let mut registry = StageRegistry::with_builtin_stages();
        registry.register_plugin::<Dropper>("Dropper", "Discards its input.");
        assert!(registry.contains("Dropper"));
        let stage = registry.create("Dropper").unwrap();
        assert!(matches!(stage, AnyStage::Plugin(_)));
        assert_eq!(stage.sockets().len(), 1);
    }
}
