//! # gossipnet
//!
//! Gossip-style, heartbeat-based group membership and failure detection:
//! - **Bounded membership table**: capacity-limited, eventually-consistent
//!   view of which peers are alive
//! - **Piggybacked dissemination**: every protocol message carries a full
//!   table snapshot; there is no separate gossip message type
//! - **Logical-clock staleness**: suspicion and removal are counted in
//!   protocol rounds, never wall time
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  MembershipAgent                     │
//! ├─────────────┬──────────────┬─────────────────────────┤
//! │    Join     │   Message    │      Round Driver       │
//! │ Controller  │   Handler    │        (tick)           │
//! ├─────────────┴──────────────┴─────────────────────────┤
//! │        MemberTable (merge / evict / expire /         │
//! │            snapshot / probe selection)               │
//! ├──────────────────────────────────────────────────────┤
//! │   Transport (UdpTransport | MemoryNetwork endpoint)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The agent is logically single-threaded: its run loop drains the
//! transport inbox, then performs one protocol round. Nodes share state
//! only by value, inside messages.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gossipnet::{AgentConfig, MembershipAgent, UdpTransport};
//!
//! let config = AgentConfig::builder()
//!     .local_addr("10.0.0.2:7946".parse()?)
//!     .introducer_addr("10.0.0.1:7946".parse()?)
//!     .build();
//! let transport = UdpTransport::bind(config.local_addr).await?;
//! let mut agent = MembershipAgent::new(config, transport)?;
//! agent.run().await?;
//! ```
//!
//! This crate is not a consensus protocol (views converge, they are
//! never agreed on), not a reliable transport, and performs no
//! authentication of membership claims.

pub mod agent;
pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod table;
pub mod transport;

pub use agent::{AgentState, MembershipAgent, MembershipEvent};
pub use config::{AgentConfig, AgentConfigBuilder};
pub use error::{MembershipError, Result};
pub use node::{MemberEntry, NodeId};
pub use protocol::{GossipMessage, MessageKind, WireEntry};
pub use table::{MemberTable, MergeOutcome};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};

/// Re-export of the commonly used types
pub mod prelude {
    pub use crate::agent::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::node::*;
    pub use crate::transport::*;
}
