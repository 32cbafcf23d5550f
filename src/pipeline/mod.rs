//! Stage-based processing pipeline.
//!
//! Values flow from output sockets into bounded input queues. Each stage
//! decides with its flow controller when a processing round may run, and its
//! processor decides on which thread. Compounds group stages, relay control
//! calls and aggregate the states of their children.
//!
//! # Architecture
//!
//! ```text
//! Pipeline ── root Compound ──┬── [CounterSource] ──► [Scale] ──► [Collector]
//!                             └── Compound ── ...
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinStage` enum for all built-in stages,
//!   boxed trait objects for user stages.
//! - **Control tags in-band**: stop, pause, resume, reconfigure and the
//!   start/end markers travel through the same queues as objects.
//! - **Backpressure**: a full input blocks the sender (or refuses a `try_send`)
//!   until the consumer dequeues.
//! - **No global state**: the stage registry is a value handed to the builder.

pub mod bridge;
pub mod builder;
pub mod compound;
pub mod error;
pub mod flow;
pub mod id;
pub mod node;
pub mod processor;
pub mod property;
pub mod registry;
pub mod socket;
pub mod stage;
pub mod stage_node;
pub mod stages;
pub mod state;
pub mod topology;
pub mod value;

pub use bridge::{Pipeline, PipelineEvent, RunReport, StageSummary};
pub use builder::PipelineBuilder;
pub use compound::Compound;
pub use error::{PipelineError, PipelineResult};
pub use flow::{FlowState, SyncEvent, SyncKind};
pub use id::{NodeId, SocketId};
pub use node::{Node, ProcessingMode};
pub use property::{Configurable, PropertySet, PropertyValue};
pub use registry::StageRegistry;
pub use socket::{InputSocket, OutputSocket, ProxySocket, SocketDescriptor, SocketDirection};
pub use stage::{AnyStage, BuiltinStage, ProcessOutcome, Stage, StageContext};
pub use stage_node::StageNode;
pub use state::{ErrorReport, StageListener, StageState};
pub use topology::TopologyPlan;
pub use value::{Object, ResumeState, Value, ValueKind};
