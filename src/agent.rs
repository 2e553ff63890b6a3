//! The membership agent: join bootstrapping, message dispatch and the
//! periodic failure-detection round
//!
//! One agent per process. The agent is logically single-threaded: the
//! [`run`](MembershipAgent::run) loop drains all queued inbound messages
//! through the handler, then performs one protocol round. Everything the
//! agent owns (table, clock, transport) is touched only from that loop,
//! so the core methods take `&mut self` and need no locking.

use crate::config::AgentConfig;
use crate::error::{MembershipError, Result};
use crate::node::{MemberEntry, NodeId};
use crate::protocol::{GossipMessage, MessageKind, WireEntry};
use crate::table::{MemberTable, MergeOutcome};
use crate::transport::Transport;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Capacity of the membership event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Protocol state of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for the introducer to answer our join request
    Joining,
    /// Full participant: ticking, probing and gossiping
    Member,
}

/// Membership change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// This node became a group member
    Joined,
    /// A new peer appeared in the table
    MemberJoined(NodeId),
    /// A peer entered the suspicion window
    MemberSuspected(NodeId),
    /// A peer was forgotten (expired or evicted for capacity)
    MemberRemoved(NodeId),
}

/// Gossip-based membership and failure-detection agent.
///
/// Generic over its [`Transport`] so the same state machine runs over
/// real UDP and over the in-memory test network.
pub struct MembershipAgent<T: Transport> {
    config: AgentConfig,
    local: NodeId,
    introducer: NodeId,
    state: AgentState,
    clock: u64,
    table: MemberTable,
    transport: T,
    events: broadcast::Sender<MembershipEvent>,
    join_attempts: u32,
    rounds_since_join_attempt: u64,
    last_rejoin_clock: u64,
}

impl<T: Transport> MembershipAgent<T> {
    /// Create an agent with its table seeded to `{self}`.
    ///
    /// Fails fatally if the configuration is inconsistent or an identity
    /// cannot be derived from the configured addresses.
    pub fn new(config: AgentConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let local = NodeId::from_socket_addr(config.local_addr)?;
        let introducer = NodeId::from_socket_addr(config.introducer_addr)?;
        let table = MemberTable::new(local, config.capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            local,
            introducer,
            state: AgentState::Joining,
            clock: 0,
            table,
            transport,
            events,
            join_attempts: 0,
            rounds_since_join_attempt: 0,
            last_rejoin_clock: 0,
        })
    }

    /// Begin the join procedure.
    ///
    /// The node whose address is the introducer address seeds the group
    /// and becomes a member immediately; everyone else sends a JOINREQ
    /// and stays in [`AgentState::Joining`] until a JOINREP arrives.
    pub fn start(&mut self) {
        if self.local == self.introducer {
            info!(node = %self.local, "starting up group");
            self.become_member();
        } else {
            info!(node = %self.local, introducer = %self.introducer, "trying to join group");
            self.send_join_request();
        }
    }

    /// This node's identity
    pub fn local_node(&self) -> NodeId {
        self.local
    }

    /// Current protocol state
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Whether the node has joined the group
    pub fn is_member(&self) -> bool {
        self.state == AgentState::Member
    }

    /// Current local logical clock (round counter)
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Snapshot of the membership table, own entry first
    pub fn members(&self) -> Vec<MemberEntry> {
        self.table.entries().to_vec()
    }

    /// Peers currently inside the suspicion window
    pub fn suspected_members(&self) -> Vec<NodeId> {
        self.table.suspected(self.clock, self.config.fail_after)
    }

    /// Subscribe to membership change events
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drain every queued inbound datagram through the message handler.
    ///
    /// Malformed datagrams are dropped without affecting protocol state.
    pub fn poll_inbox(&mut self) {
        while let Some(payload) = self.transport.try_recv() {
            match GossipMessage::decode(&payload, self.config.capacity) {
                Ok(msg) => self.handle_message(msg),
                Err(e) => {
                    warn!(node = %self.local, error = %e, "ignoring malformed datagram");
                }
            }
        }
    }

    /// Dispatch one protocol message.
    ///
    /// Every message carries a full table snapshot and every path merges
    /// it: the snapshot piggyback is the entire dissemination mechanism.
    pub fn handle_message(&mut self, msg: GossipMessage) {
        trace!(node = %self.local, from = %msg.sender, kind = ?msg.kind, "message received");
        match msg.kind {
            MessageKind::JoinReq => {
                self.send_snapshot(MessageKind::JoinRep, msg.sender);
                self.merge_snapshot(&msg);
            }
            MessageKind::JoinRep => {
                self.merge_snapshot(&msg);
                if self.state == AgentState::Joining {
                    info!(node = %self.local, "joined group");
                    self.become_member();
                }
            }
            MessageKind::PingReq => {
                self.send_snapshot(MessageKind::PingRep, msg.sender);
                self.merge_snapshot(&msg);
            }
            MessageKind::PingRep => {
                self.merge_snapshot(&msg);
            }
        }
    }

    /// One protocol round. Only meaningful while a member; the driver
    /// loop calls [`on_interval`](Self::on_interval) which routes here.
    pub fn tick(&mut self) {
        self.clock += 1;
        self.table.refresh_owner(self.clock);

        for removed in self.table.expire(self.clock, self.config.remove_after) {
            info!(node = %self.local, member = %removed, "member expired");
            let _ = self.events.send(MembershipEvent::MemberRemoved(removed));
        }

        // Suspicion onset is exact: the clock advances one round at a
        // time and a refresh resets the staleness, so each peer crosses
        // the threshold at equality.
        for entry in self.table.entries().iter().skip(1) {
            if entry.staleness(self.clock) == self.config.fail_after {
                debug!(node = %self.local, member = %entry.node, "member suspected failed");
                let _ = self
                    .events
                    .send(MembershipEvent::MemberSuspected(entry.node));
            }
        }

        if self.table.peer_count() == 0 {
            // Empty view: self-heal by rejoining through the introducer,
            // throttled so a long outage does not turn into a storm.
            if self.local != self.introducer
                && self.clock - self.last_rejoin_clock >= self.config.rejoin_backoff
            {
                warn!(node = %self.local, "no members besides self, rejoining group");
                self.last_rejoin_clock = self.clock;
                self.send_join_request();
            }
            return;
        }

        match self.table.probe_target(self.clock, self.config.fail_after) {
            Some(target) => {
                trace!(node = %self.local, %target, "probing peer");
                self.send_snapshot(MessageKind::PingReq, target);
            }
            None => {
                debug!(node = %self.local, "all peers suspected, skipping probe");
            }
        }
    }

    /// One iteration of the cooperative loop: drain the inbox, then run
    /// a round (member) or the join retry policy (joining).
    pub fn on_interval(&mut self) -> Result<()> {
        self.poll_inbox();
        match self.state {
            AgentState::Member => {
                self.tick();
                Ok(())
            }
            AgentState::Joining => self.retry_join(),
        }
    }

    /// Drive the protocol until a fatal error occurs.
    ///
    /// [`start`](Self::start) is invoked first, then one
    /// [`on_interval`](Self::on_interval) per tick interval.
    pub async fn run(&mut self) -> Result<()> {
        self.start();
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.on_interval()?;
        }
    }

    fn become_member(&mut self) {
        self.state = AgentState::Member;
        self.join_attempts = 0;
        let _ = self.events.send(MembershipEvent::Joined);
    }

    /// Bounded join retry: re-send the JOINREQ every `rejoin_backoff`
    /// rounds until `max_join_attempts` is exhausted.
    fn retry_join(&mut self) -> Result<()> {
        self.rounds_since_join_attempt += 1;
        if self.rounds_since_join_attempt < self.config.rejoin_backoff {
            return Ok(());
        }
        if self.join_attempts >= self.config.max_join_attempts {
            return Err(MembershipError::JoinTimeout {
                attempts: self.join_attempts,
            });
        }
        debug!(node = %self.local, attempt = self.join_attempts + 1, "retrying join");
        self.send_join_request();
        Ok(())
    }

    /// JOINREQ carries a single-entry snapshot: just this node
    fn send_join_request(&mut self) {
        let entries = vec![WireEntry {
            node: self.local,
            heartbeat: self.table.self_entry().heartbeat,
        }];
        let msg = GossipMessage::new(MessageKind::JoinReq, self.local, entries);
        self.transport.send(self.introducer, &msg.encode());
        self.join_attempts += 1;
        self.rounds_since_join_attempt = 0;
    }

    /// Send a message carrying the filtered table snapshot
    fn send_snapshot(&mut self, kind: MessageKind, dest: NodeId) {
        let entries = self.table.gossip_entries(self.clock, self.config.fail_after);
        let msg = GossipMessage::new(kind, self.local, entries);
        self.transport.send(dest, &msg.encode());
    }

    /// Merge a message's piggybacked entries into the table.
    ///
    /// Entries are applied in reverse order: the sender's own entry
    /// rides at index 0 of its snapshot, and applying it last lets its
    /// freshest heartbeat win against duplicate keys in the same batch.
    fn merge_snapshot(&mut self, msg: &GossipMessage) {
        for entry in msg.entries.iter().rev() {
            match self.table.merge_entry(entry, self.clock) {
                MergeOutcome::Added => {
                    let _ = self.events.send(MembershipEvent::MemberJoined(entry.node));
                }
                MergeOutcome::Replaced { evicted } => {
                    let _ = self.events.send(MembershipEvent::MemberRemoved(evicted));
                    let _ = self.events.send(MembershipEvent::MemberJoined(entry.node));
                }
                MergeOutcome::Refreshed | MergeOutcome::Ignored => {}
            }
        }
    }
}
