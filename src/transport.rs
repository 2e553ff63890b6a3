//! Datagram transport for gossip traffic
//!
//! The protocol core only needs two things from a network: best-effort
//! `send` (messages may be silently dropped) and non-blocking
//! poll-and-drain reception. [`UdpTransport`] provides that over a real
//! socket; [`MemoryNetwork`] provides an in-process network with
//! configurable loss and partitions for tests and simulation.

use crate::error::{MembershipError, Result};
use crate::node::NodeId;
use dashmap::DashMap;
use rand::Rng;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Datagram transport contract consumed by the membership agent.
///
/// Delivery is best effort and unordered across senders. The agent owns
/// its transport exclusively and drains it on its own cadence, so no
/// method blocks and no internal locking is required of callers.
pub trait Transport: Send {
    /// Send a datagram to `dest`. Failures are swallowed: the gossip
    /// cadence re-sends fresher state on the next round anyway.
    fn send(&mut self, dest: NodeId, payload: &[u8]);

    /// Pop one queued inbound datagram, if any
    fn try_recv(&mut self) -> Option<Vec<u8>>;
}

/// UDP transport: a bound socket plus a receiver task that feeds an
/// unbounded inbox channel.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    recv_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a socket and start the receiver task.
    ///
    /// A bind failure is a fatal startup error for the node.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| MembershipError::Network(format!("failed to bind {addr}: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| MembershipError::Network(e.to_string()))?;
        let socket = Arc::new(socket);

        let (tx, inbox) = mpsc::unbounded_channel();
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        trace!(%from, len, "datagram received");
                        if tx.send(buf[..len].to_vec()).is_err() {
                            break; // transport dropped
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "socket recv error");
                    }
                }
            }
        });

        Ok(Self {
            socket,
            inbox,
            recv_task,
            local_addr,
        })
    }

    /// The address the socket actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, dest: NodeId, payload: &[u8]) {
        if let Err(e) = self.socket.try_send_to(payload, dest.socket_addr().into()) {
            debug!(%dest, error = %e, "dropping outbound datagram");
        }
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.inbox.try_recv().ok()
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

struct MemoryNetworkInner {
    inboxes: DashMap<NodeId, VecDeque<Vec<u8>>>,
    partitioned: DashMap<NodeId, ()>,
    drop_rate: f64,
}

/// In-process datagram network shared by a set of [`MemoryTransport`]
/// endpoints. Supports probabilistic message loss and per-node
/// partitions, which is all the failure-detection scenarios need.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<MemoryNetworkInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Lossless network
    pub fn new() -> Self {
        Self::with_drop_rate(0.0)
    }

    /// Network that silently drops each datagram with probability `rate`
    pub fn with_drop_rate(rate: f64) -> Self {
        Self {
            inner: Arc::new(MemoryNetworkInner {
                inboxes: DashMap::new(),
                partitioned: DashMap::new(),
                drop_rate: rate.clamp(0.0, 1.0),
            }),
        }
    }

    /// Register an endpoint for `node` and return its transport handle
    pub fn endpoint(&self, node: NodeId) -> MemoryTransport {
        self.inner.inboxes.entry(node).or_default();
        MemoryTransport {
            net: self.clone(),
            node,
        }
    }

    /// Cut `node` off: all traffic to and from it is dropped
    pub fn partition(&self, node: NodeId) {
        self.inner.partitioned.insert(node, ());
    }

    /// Reconnect a partitioned node
    pub fn heal(&self, node: NodeId) {
        self.inner.partitioned.remove(&node);
    }

    /// Queued datagram count for a node's inbox
    pub fn pending(&self, node: NodeId) -> usize {
        self.inner.inboxes.get(&node).map_or(0, |q| q.len())
    }

    fn deliver(&self, from: NodeId, dest: NodeId, payload: &[u8]) {
        let inner = &self.inner;
        if inner.partitioned.contains_key(&from) || inner.partitioned.contains_key(&dest) {
            trace!(%from, %dest, "partitioned, dropping datagram");
            return;
        }
        if inner.drop_rate > 0.0 && rand::thread_rng().gen::<f64>() < inner.drop_rate {
            trace!(%from, %dest, "lossy network dropped datagram");
            return;
        }
        // Datagrams to unregistered destinations vanish, like real UDP
        if let Some(mut inbox) = inner.inboxes.get_mut(&dest) {
            inbox.push_back(payload.to_vec());
        }
    }
}

/// One node's endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    net: MemoryNetwork,
    node: NodeId,
}

impl MemoryTransport {
    /// The identity this endpoint sends as
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, dest: NodeId, payload: &[u8]) {
        self.net.deliver(self.node, dest, payload);
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.net.inner.inboxes.get_mut(&self.node)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> NodeId {
        NodeId::new(id, 9000)
    }

    #[test]
    fn test_memory_network_delivers_in_order() {
        let net = MemoryNetwork::new();
        let mut a = net.endpoint(node(1));
        let mut b = net.endpoint(node(2));

        a.send(node(2), b"one");
        a.send(node(2), b"two");

        assert_eq!(b.try_recv().unwrap(), b"one");
        assert_eq!(b.try_recv().unwrap(), b"two");
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn test_memory_network_drops_to_unknown_dest() {
        let net = MemoryNetwork::new();
        let mut a = net.endpoint(node(1));
        a.send(node(99), b"void");
        assert_eq!(net.pending(node(99)), 0);
    }

    #[test]
    fn test_memory_network_full_loss() {
        let net = MemoryNetwork::with_drop_rate(1.0);
        let mut a = net.endpoint(node(1));
        let mut b = net.endpoint(node(2));

        for _ in 0..50 {
            a.send(node(2), b"gone");
        }
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn test_memory_network_partition_and_heal() {
        let net = MemoryNetwork::new();
        let mut a = net.endpoint(node(1));
        let mut b = net.endpoint(node(2));

        net.partition(node(2));
        a.send(node(2), b"lost");
        b.send(node(1), b"lost");
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());

        net.heal(node(2));
        a.send(node(2), b"through");
        assert_eq!(b.try_recv().unwrap(), b"through");
    }

    #[tokio::test]
    async fn test_udp_transport_round_trip() {
        let mut a = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let b_node = NodeId::from_socket_addr(b.local_addr()).unwrap();
        a.send(b_node, b"hello");

        // Give the receiver task a moment to pick the datagram up
        let mut received = None;
        for _ in 0..50 {
            if let Some(payload) = b.try_recv() {
                received = Some(payload);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
    }
}
