//! Builds a runnable [`Pipeline`] from a [`PipelineConfig`].

use crate::config::{PipelineConfig, RuntimeSettings, StageConfig};
use crate::error::{Error, Result, ResultExt};
use crate::pipeline::bridge::Pipeline;
use crate::pipeline::compound::Compound;
use crate::pipeline::error::PipelineError;
use crate::pipeline::node::{Node, ProcessingMode};
use crate::pipeline::property::Configurable;
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::socket::DEFAULT_QUEUE_CAPACITY;
use crate::pipeline::stage_node::StageNode;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Turns pipeline descriptions into wired, stopped pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    queue_capacity: usize,
    pool_threads: usize,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder using the defaults from `settings`.
    pub fn with_settings(settings: &RuntimeSettings) -> Self {
        Self::new()
            .queue_capacity(settings.queue_capacity)
            .pool_threads(settings.pool_threads)
    }

    /// Capacity given to every input not overridden in the file.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Worker count for `pool` stages declared with zero threads.
    pub fn pool_threads(mut self, threads: usize) -> Self {
        self.pool_threads = threads.max(1);
        self
    }

    /// Create every stage, apply its settings, wire the connections and
    /// reject cyclic graphs.
    pub fn build(&self, config: &PipelineConfig, registry: &StageRegistry) -> Result<Pipeline> {
        config.validate()?;

        let root = Compound::new(config.name.clone());
        let mut stages = BTreeMap::new();

        for stage_config in &config.stages {
            let node = self
                .build_stage(stage_config, config, registry)
                .with_context(|| format!("Stage '{}'", stage_config.name))?;
            root.add_child(node.clone())?;
            stages.insert(stage_config.name.clone(), node);
        }

        for connection in &config.connections {
            root.connect(&connection.from, &connection.to)
                .with_context(|| format!("Connection {} -> {}", connection.from, connection.to))?;
        }

        let plan = root.topology();
        plan.ensure_acyclic()?;

        tracing::info!(
            "Built pipeline '{}': {} stages, {} connections, {} sources, {} sinks",
            config.name,
            plan.stats.total_nodes,
            plan.stats.edges,
            plan.stats.source_nodes,
            plan.stats.sink_nodes
        );

        Ok(Pipeline::with_stages(root, stages))
    }

    fn build_stage(
        &self,
        stage_config: &StageConfig,
        config: &PipelineConfig,
        registry: &StageRegistry,
    ) -> Result<Arc<StageNode>> {
        let stage = registry.create(&stage_config.class)?;
        let mode = match stage_config.mode {
            ProcessingMode::Pool { threads: 0 } => ProcessingMode::Pool {
                threads: self.pool_threads,
            },
            mode => mode,
        };
        let node = StageNode::new(stage_config.name.clone(), stage, mode);

        if self.queue_capacity != DEFAULT_QUEUE_CAPACITY {
            for input in node.input_names() {
                node.set_queue_capacity(&input, self.queue_capacity)?;
            }
        }

        for (socket, overrides) in &stage_config.inputs {
            if node.input(socket).is_none() {
                return Err(PipelineError::UnknownSocket(format!(
                    "{}.{}",
                    stage_config.name, socket
                ))
                .into());
            }
            if let Some(capacity) = overrides.capacity {
                node.set_queue_capacity(socket, capacity)?;
            }
            if let Some(group) = overrides.group {
                node.set_group_id(socket, group)?;
            }
        }

        for (name, value) in &stage_config.properties {
            node.set_property(name, value.clone())?;
        }

        for (set, per_stage) in &config.property_sets {
            let Some(properties) = per_stage.get(&stage_config.name) else {
                continue;
            };
            let known = node.stage().property_names();
            if let Some(unknown) = properties.keys().find(|p| !known.contains(&p.as_str())) {
                if !known.is_empty() {
                    return Err(Error::from(PipelineError::UnknownProperty(unknown.clone()))
                        .with_context(format!("Property set '{}'", set)));
                }
            }
            node.cache_property_set(set.clone(), properties.clone());
        }

        tracing::debug!(
            "Created stage '{}' ({}, {})",
            stage_config.name,
            stage_config.class,
            mode
        );
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, InputConfig};
    use crate::pipeline::property::PropertyValue;
    use crate::pipeline::state::StageState;
    use std::time::Duration;

    fn chain() -> PipelineConfig {
        let mut config = PipelineConfig::new("chain");
        let mut source = StageConfig::new("source", "CounterSource");
        source
            .properties
            .insert("count".to_string(), PropertyValue::Int(6));
        let mut scale = StageConfig::new("scale", "Scale").with_mode(ProcessingMode::Inline);
        scale
            .properties
            .insert("factor".to_string(), PropertyValue::Float(3.0));
        let sink = StageConfig::new("sink", "Collector").with_mode(ProcessingMode::Inline);
        config.stages = vec![source, scale, sink];
        config.connections = vec![
            ConnectionConfig {
                from: "source.out".to_string(),
                to: "scale.in".to_string(),
            },
            ConnectionConfig {
                from: "scale.out".to_string(),
                to: "sink.in".to_string(),
            },
        ];
        config
    }

    #[test]
    fn test_build_and_run_chain() {
        let registry = StageRegistry::with_builtin_stages();
        let pipeline = PipelineBuilder::new().build(&chain(), &registry).unwrap();
        let handle = pipeline
            .stage("sink")
            .unwrap()
            .stage()
            .as_collector()
            .unwrap()
            .handle();

        pipeline.start().unwrap();
        assert!(pipeline.wait_until_stopped(Duration::from_secs(5)));
        assert_eq!(handle.objects::<i64>(), vec![0, 3, 6, 9, 12, 15]);
        assert!(pipeline.errors().is_empty());
    }

    #[test]
    fn test_input_overrides_applied() {
        let mut config = chain();
        config.stages[1].inputs.insert(
            "in".to_string(),
            InputConfig {
                capacity: Some(16),
                group: Some(2),
            },
        );
        let registry = StageRegistry::with_builtin_stages();
        let pipeline = PipelineBuilder::new()
            .queue_capacity(4)
            .build(&config, &registry)
            .unwrap();

        let scale = pipeline.stage("scale").unwrap();
        let input = scale.input("in").unwrap();
        assert_eq!(input.capacity(), 16);
        assert_eq!(input.group_id(), 2);
        assert_eq!(pipeline.stage("sink").unwrap().input("in").unwrap().capacity(), 4);
    }

    #[test]
    fn test_pool_threads_default() {
        let mut config = chain();
        config.stages[1].mode = ProcessingMode::Pool { threads: 0 };
        let registry = StageRegistry::with_builtin_stages();
        let pipeline = PipelineBuilder::new()
            .pool_threads(3)
            .build(&config, &registry)
            .unwrap();
        assert_eq!(
            pipeline.stage("scale").unwrap().mode(),
            ProcessingMode::Pool { threads: 3 }
        );
    }

    #[test]
    fn test_unknown_class_has_context() {
        let mut config = chain();
        config.stages[1].class = "Blur".to_string();
        let registry = StageRegistry::with_builtin_stages();
        let err = PipelineBuilder::new().build(&config, &registry).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Stage 'scale'"));
        assert!(text.contains("Blur"));
    }

    #[test]
    fn test_unknown_socket_rejected() {
        let mut config = chain();
        config.connections[0].to = "scale.image".to_string();
        let registry = StageRegistry::with_builtin_stages();
        let err = PipelineBuilder::new().build(&config, &registry).unwrap_err();
        assert!(err.to_string().contains("scale.image"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut config = PipelineConfig::new("loop");
        config.stages = vec![
            StageConfig::new("x", "Passthrough"),
            StageConfig::new("y", "Passthrough"),
        ];
        config.connections = vec![
            ConnectionConfig {
                from: "x.out".to_string(),
                to: "y.in".to_string(),
            },
            ConnectionConfig {
                from: "y.out".to_string(),
                to: "x.in".to_string(),
            },
        ];
        let registry = StageRegistry::with_builtin_stages();
        let err = PipelineBuilder::new().build(&config, &registry).unwrap_err();
        assert!(matches!(err, Error::Pipeline(PipelineError::CycleDetected)));
    }

    #[test]
    fn test_property_set_cached_and_applied() {
        let mut config = chain();
        config.property_sets.insert(
            "triple".to_string(),
            BTreeMap::from([(
                "scale".to_string(),
                BTreeMap::from([("factor".to_string(), PropertyValue::Float(9.0))]),
            )]),
        );
        let registry = StageRegistry::with_builtin_stages();
        let pipeline = PipelineBuilder::new().build(&config, &registry).unwrap();
        assert_eq!(pipeline.state(), StageState::Stopped);

        pipeline.reconfigure("triple").unwrap();
        assert_eq!(
            pipeline.stage("scale").unwrap().property("factor"),
            Some(PropertyValue::Float(9.0))
        );
    }

    #[test]
    fn test_unknown_property_in_set_rejected() {
        let mut config = chain();
        config.property_sets.insert(
            "bad".to_string(),
            BTreeMap::from([(
                "scale".to_string(),
                BTreeMap::from([("gain".to_string(), PropertyValue::Float(1.0))]),
            )]),
        );
        let registry = StageRegistry::with_builtin_stages();
        let err = PipelineBuilder::new().build(&config, &registry).unwrap_err();
        assert!(err.to_string().contains("gain"));
    }
}
