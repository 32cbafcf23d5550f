//! Forwarding socket pair used on compound boundaries.
//!
//! A proxy is an input and an output glued together: whatever its input is
//! offered goes straight to its output's connections, with no queueing of
//! its own. Compounds expose their inner sockets to the outside world
//! through proxies.

use super::input::{InputController, InputSocket};
use super::output::OutputSocket;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::SocketId;
use crate::pipeline::value::Value;
use std::sync::{Arc, Weak};

pub struct ProxySocket {
    input: Arc<InputSocket>,
    output: Arc<OutputSocket>,
}

impl ProxySocket {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_id(SocketId::DETACHED, name.into())
    }

    pub(crate) fn with_id(id: SocketId, name: String) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<ProxySocket>| {
            let output = Arc::new(OutputSocket::proxy(id, name.clone()));
            let controller: Weak<dyn InputController> = this.clone();
            let input = Arc::new(InputSocket::proxy(
                id,
                name,
                controller,
                Arc::downgrade(&output),
            ));
            output.set_upstream(Arc::downgrade(&input));
            ProxySocket { input, output }
        })
    }

    pub fn name(&self) -> &str {
        self.input.name()
    }

    /// The side that receives from outside.
    pub fn input(&self) -> &Arc<InputSocket> {
        &self.input
    }

    /// The side that forwards to the proxy's connections.
    pub fn output(&self) -> &Arc<OutputSocket> {
        &self.output
    }
}

impl InputController for ProxySocket {
    fn try_to_receive(&self, _input: &InputSocket, value: Value) -> PipelineResult<bool> {
        self.output.try_send(&value)
    }
}

impl std::fmt::Debug for ProxySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySocket").field("name", &self.name()).finish()
    }
}
