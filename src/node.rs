//! Node identity and membership table entries

use crate::error::{MembershipError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Unique node identifier: a 4-byte numeric id plus a 2-byte port.
///
/// The id is the node's IPv4 address interpreted as a big-endian integer,
/// so a `NodeId` and a `SocketAddrV4` convert losslessly in both
/// directions. A node's identity never changes during its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Numeric host id (IPv4 address in big-endian)
    pub id: u32,
    /// Protocol port
    pub port: u16,
}

impl NodeId {
    /// Create a node id from raw id and port
    pub fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    /// Derive a node identity from a socket address.
    ///
    /// Only IPv4 addresses carry a valid identity; anything else is a
    /// fatal initialization error.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self> {
        match addr.ip() {
            IpAddr::V4(ip) => Ok(Self {
                id: u32::from(ip),
                port: addr.port(),
            }),
            IpAddr::V6(_) => Err(MembershipError::InvalidAddress(addr)),
        }
    }

    /// The socket address this identity maps back to
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(self.id), self.port)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddrV4> for NodeId {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            id: u32::from(*addr.ip()),
            port: addr.port(),
        }
    }
}

/// One row of the membership table.
///
/// `heartbeat` is the last counter value reported by the entry's owner.
/// `last_refreshed` is the *observing* node's own logical clock at the
/// moment the entry was last updated; it is never transmitted and is only
/// meaningful to the node that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberEntry {
    /// Member identity
    pub node: NodeId,
    /// Last heartbeat reported by the owner (monotonically non-decreasing)
    pub heartbeat: u64,
    /// Observer's local clock at last refresh
    pub last_refreshed: u64,
}

impl MemberEntry {
    /// Create a fresh entry recorded at `local_clock`
    pub fn new(node: NodeId, heartbeat: u64, local_clock: u64) -> Self {
        Self {
            node,
            heartbeat,
            last_refreshed: local_clock,
        }
    }

    /// Rounds elapsed since this entry was last refreshed
    pub fn staleness(&self, local_clock: u64) -> u64 {
        local_clock.saturating_sub(self.last_refreshed)
    }

    /// Whether the member is locally presumed failed: no fresher report
    /// for at least `fail_after` rounds. Suspected entries stay in the
    /// table but are excluded from outbound gossip.
    pub fn is_suspected(&self, local_clock: u64, fail_after: u64) -> bool {
        self.staleness(local_clock) >= fail_after
    }

    /// Whether the member should be forgotten entirely
    pub fn is_expired(&self, local_clock: u64, remove_after: u64) -> bool {
        self.staleness(local_clock) >= remove_after
    }
}
