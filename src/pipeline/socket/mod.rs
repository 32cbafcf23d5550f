//! Sockets: the endpoints of connections between stages.
//!
//! An [`OutputSocket`] fans out to any number of [`InputSocket`]s; each
//! input has at most one source. Inputs own a bounded queue; outputs
//! block (or report "not accepted" from `try_send`) while a target is full.
//! [`ProxySocket`]s forward across compound boundaries.

mod input;
mod output;
mod proxy;
pub(crate) mod queue;
pub(crate) mod turns;

pub use input::{InputController, InputSocket};
pub use output::OutputSocket;
pub use proxy::ProxySocket;

/// Queue capacity of newly created stage inputs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDirection {
    Input,
    Output,
}

/// Static description of a socket declared by a stage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketDescriptor {
    pub name: &'static str,
    pub direction: SocketDirection,
    /// Synchronization group; inputs of one group are consumed together.
    pub group: i32,
    /// Optional inputs may stay unconnected.
    pub optional: bool,
}

impl SocketDescriptor {
    pub const fn input(name: &'static str) -> Self {
        Self {
            name,
            direction: SocketDirection::Input,
            group: 0,
            optional: false,
        }
    }

    pub const fn output(name: &'static str) -> Self {
        Self {
            name,
            direction: SocketDirection::Output,
            group: 0,
            optional: false,
        }
    }

    pub const fn in_group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == SocketDirection::Input
    }
}
