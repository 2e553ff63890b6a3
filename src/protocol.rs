//! Wire protocol for gossip messages
//!
//! Every protocol message is a single datagram with a fixed-width layout,
//! big-endian throughout:
//!
//! ```text
//! kind:        u8   (JOINREQ=0, JOINREP=1, PINGREQ=2, PINGREP=3)
//! sender id:   u32
//! sender port: u16
//! entry count: u16  (<= table capacity)
//! entries:     count x { id: u32, port: u16, heartbeat: u64 }
//! ```
//!
//! The entries are a snapshot of the sender's membership table taken at
//! send time. Observer-local timestamps are never serialized.

use crate::error::{MembershipError, Result};
use crate::node::NodeId;

/// Fixed header size: kind + sender id + sender port + entry count
pub const HEADER_LEN: usize = 1 + 4 + 2 + 2;

/// Serialized size of one membership entry
pub const ENTRY_LEN: usize = 4 + 2 + 8;

/// Largest datagram a table of `capacity` entries can produce
pub const fn max_message_len(capacity: usize) -> usize {
    HEADER_LEN + capacity * ENTRY_LEN
}

/// Gossip message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Join request sent to the introducer
    JoinReq = 0,
    /// Join reply from the introducer
    JoinRep = 1,
    /// Periodic liveness probe
    PingReq = 2,
    /// Probe reply
    PingRep = 3,
}

impl MessageKind {
    fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(MessageKind::JoinReq),
            1 => Ok(MessageKind::JoinRep),
            2 => Ok(MessageKind::PingReq),
            3 => Ok(MessageKind::PingRep),
            other => Err(MembershipError::UnknownMessageKind(other)),
        }
    }
}

/// A membership entry as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEntry {
    /// Member identity
    pub node: NodeId,
    /// Owner-reported heartbeat counter
    pub heartbeat: u64,
}

/// A gossip protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Identity of the sending node
    pub sender: NodeId,
    /// Piggybacked membership snapshot
    pub entries: Vec<WireEntry>,
}

impl GossipMessage {
    /// Create a message carrying the given snapshot
    pub fn new(kind: MessageKind, sender: NodeId, entries: Vec<WireEntry>) -> Self {
        Self {
            kind,
            sender,
            entries,
        }
    }

    /// Serialize into a datagram payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.sender.id.to_be_bytes());
        buf.extend_from_slice(&self.sender.port.to_be_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.node.id.to_be_bytes());
            buf.extend_from_slice(&entry.node.port.to_be_bytes());
            buf.extend_from_slice(&entry.heartbeat.to_be_bytes());
        }
        buf
    }

    /// Deserialize a datagram payload.
    ///
    /// Rejects truncated buffers, unknown kinds, entry counts beyond
    /// `max_entries`, and trailing bytes. Callers drop rejected datagrams
    /// without affecting protocol state.
    pub fn decode(buf: &[u8], max_entries: usize) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(MembershipError::TruncatedMessage { len: buf.len() });
        }

        let kind = MessageKind::from_u8(buf[0])?;
        let sender = NodeId {
            id: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            port: u16::from_be_bytes([buf[5], buf[6]]),
        };
        let count = u16::from_be_bytes([buf[7], buf[8]]) as usize;

        if count > max_entries {
            return Err(MembershipError::TooManyEntries {
                count,
                max: max_entries,
            });
        }

        let body = &buf[HEADER_LEN..];
        if body.len() < count * ENTRY_LEN {
            return Err(MembershipError::TruncatedMessage { len: buf.len() });
        }
        if body.len() > count * ENTRY_LEN {
            return Err(MembershipError::TrailingBytes {
                len: body.len() - count * ENTRY_LEN,
            });
        }

        let mut entries = Vec::with_capacity(count);
        for chunk in body.chunks_exact(ENTRY_LEN) {
            entries.push(WireEntry {
                node: NodeId {
                    id: u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    port: u16::from_be_bytes([chunk[4], chunk[5]]),
                },
                heartbeat: u64::from_be_bytes([
                    chunk[6], chunk[7], chunk[8], chunk[9], chunk[10], chunk[11], chunk[12],
                    chunk[13],
                ]),
            });
        }

        Ok(Self {
            kind,
            sender,
            entries,
        })
    }
}
