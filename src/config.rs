//! Membership agent configuration

use crate::error::{MembershipError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Tuning surface of the membership protocol.
///
/// The staleness thresholds are measured in protocol rounds, not wall
/// time: each node compares peers against its own round counter only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Address this node binds and identifies as
    pub local_addr: SocketAddr,

    /// Well-known bootstrap address new members contact to join.
    /// A node whose `local_addr` equals this address seeds the group.
    pub introducer_addr: SocketAddr,

    /// Interval between protocol rounds
    pub tick_interval: Duration,

    /// Rounds without a fresher report before a peer is suspected
    /// and dropped from outbound gossip (TFAIL)
    pub fail_after: u64,

    /// Rounds without a fresher report before a peer is removed from
    /// the table entirely (TREMOVE, must exceed `fail_after`)
    pub remove_after: u64,

    /// Membership table capacity, own entry included (K)
    pub capacity: usize,

    /// Rounds between join retries and between rejoin attempts when the
    /// table has shrunk to just this node
    pub rejoin_backoff: u64,

    /// Join attempts before giving up with a fatal error
    pub max_join_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            local_addr: "127.0.0.1:7946".parse().expect("valid default addr"),
            introducer_addr: "127.0.0.1:7946".parse().expect("valid default addr"),
            tick_interval: Duration::from_secs(1),
            fail_after: 5,
            remove_after: 10,
            capacity: 32,
            rejoin_backoff: 5,
            max_join_attempts: 10,
        }
    }
}

impl AgentConfig {
    /// Start building a configuration
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Validate threshold and capacity relationships
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(MembershipError::InvalidConfig(format!(
                "capacity must be at least 2, got {}",
                self.capacity
            )));
        }
        if self.fail_after == 0 {
            return Err(MembershipError::InvalidConfig(
                "fail_after must be at least 1 round".into(),
            ));
        }
        if self.remove_after <= self.fail_after {
            return Err(MembershipError::InvalidConfig(format!(
                "remove_after ({}) must exceed fail_after ({})",
                self.remove_after, self.fail_after
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(MembershipError::InvalidConfig(
                "tick_interval must be non-zero".into(),
            ));
        }
        if self.rejoin_backoff == 0 {
            return Err(MembershipError::InvalidConfig(
                "rejoin_backoff must be at least 1 round".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`AgentConfig`]
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    local_addr: Option<SocketAddr>,
    introducer_addr: Option<SocketAddr>,
    tick_interval: Option<Duration>,
    fail_after: Option<u64>,
    remove_after: Option<u64>,
    capacity: Option<usize>,
    rejoin_backoff: Option<u64>,
    max_join_attempts: Option<u32>,
}

impl AgentConfigBuilder {
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn introducer_addr(mut self, addr: SocketAddr) -> Self {
        self.introducer_addr = Some(addr);
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn fail_after(mut self, rounds: u64) -> Self {
        self.fail_after = Some(rounds);
        self
    }

    pub fn remove_after(mut self, rounds: u64) -> Self {
        self.remove_after = Some(rounds);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn rejoin_backoff(mut self, rounds: u64) -> Self {
        self.rejoin_backoff = Some(rounds);
        self
    }

    pub fn max_join_attempts(mut self, attempts: u32) -> Self {
        self.max_join_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            local_addr: self.local_addr.unwrap_or(defaults.local_addr),
            introducer_addr: self.introducer_addr.unwrap_or(defaults.introducer_addr),
            tick_interval: self.tick_interval.unwrap_or(defaults.tick_interval),
            fail_after: self.fail_after.unwrap_or(defaults.fail_after),
            remove_after: self.remove_after.unwrap_or(defaults.remove_after),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            rejoin_backoff: self.rejoin_backoff.unwrap_or(defaults.rejoin_backoff),
            max_join_attempts: self.max_join_attempts.unwrap_or(defaults.max_join_attempts),
        }
    }
}
