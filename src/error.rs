//! Membership error types

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for membership operations
pub type Result<T> = std::result::Result<T, MembershipError>;

/// Membership errors
#[derive(Debug, Error)]
pub enum MembershipError {
    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot derive node identity from address: {0}")]
    InvalidAddress(SocketAddr),

    // ==================== Join Errors ====================
    #[error("could not join group after {attempts} attempts")]
    JoinTimeout { attempts: u32 },

    // ==================== Codec Errors ====================
    #[error("truncated message: {len} bytes")]
    TruncatedMessage { len: usize },

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u8),

    #[error("too many entries: {count} (max {max})")]
    TooManyEntries { count: usize, max: usize },

    #[error("trailing bytes after message body: {len}")]
    TrailingBytes { len: usize },

    // ==================== Network Errors ====================
    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MembershipError {
    /// Check if this error should abort the node rather than be retried.
    ///
    /// Codec and network errors are recoverable: a malformed datagram is
    /// dropped and the gossip cadence re-sends fresher state on the next
    /// round. Identity and configuration errors are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MembershipError::InvalidConfig(_)
                | MembershipError::InvalidAddress(_)
                | MembershipError::JoinTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(MembershipError::InvalidConfig("capacity".into()).is_fatal());
        assert!(MembershipError::JoinTimeout { attempts: 10 }.is_fatal());

        assert!(!MembershipError::UnknownMessageKind(9).is_fatal());
        assert!(!MembershipError::TruncatedMessage { len: 3 }.is_fatal());
        assert!(!MembershipError::Network("send failed".into()).is_fatal());
    }
}
