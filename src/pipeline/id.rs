//! Identity types for the pipeline system.
//!
//! `NodeId` identifies a stage or compound instance for the lifetime of the
//! process and is what error reports carry as the "instance identifier".
//! `SocketId` packs the owning node and the socket's index into one `u32`.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique identifier of a stage or compound.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);

    /// Allocate a fresh id.
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed) % SocketId::NODE_MASK)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Compact socket identifier. High 20 bits = node id, low 12 bits = socket index.
///
/// Input and output indices are counted separately; the socket type tells
/// which list an index refers to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u32);

impl SocketId {
    const SOCKET_BITS: u32 = 12;
    const SOCKET_MASK: u32 = (1 << Self::SOCKET_BITS) - 1;
    const NODE_MASK: u32 = (1 << (32 - Self::SOCKET_BITS)) - 1;

    /// Id used by sockets that are not owned by any node. The all-ones node
    /// field is never handed out by `NodeId::next`.
    pub const DETACHED: SocketId = SocketId(u32::MAX);

    pub fn new(node: NodeId, socket_index: u16) -> Self {
        debug_assert!(socket_index < (1 << Self::SOCKET_BITS) as u16);
        Self(((node.0 & Self::NODE_MASK) << Self::SOCKET_BITS) | (socket_index as u32 & Self::SOCKET_MASK))
    }

    #[inline]
    pub fn node(self) -> NodeId {
        if self == Self::DETACHED {
            return NodeId::INVALID;
        }
        NodeId(self.0 >> Self::SOCKET_BITS)
    }

    #[inline]
    pub fn socket_index(self) -> u16 {
        (self.0 & Self::SOCKET_MASK) as u16
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DETACHED {
            return write!(f, "SocketId(DETACHED)");
        }
        write!(
            f,
            "SocketId(node={}, socket={})",
            self.node().0,
            self.socket_index()
        )
    }
}
