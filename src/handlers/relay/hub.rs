//! Peer registry and fan-out channels for the relay.
//!
//! Each role has its own broadcast channel. Frames read from an upstream
//! peer are published on the upstream channel and every downstream peer
//! holds a receiver on it; in debug mode the reverse direction works the
//! same way. Receivers are created when a peer joins, so late peers only
//! see frames published after they joined.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RelayMode;

/// Capacity of each fan-out channel; slower peers skip frames.
const FANOUT_CAPACITY: usize = 1024;

/// Which side of the relay a peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Model-bearing peer (`/model`, `/provider`)
    Upstream,
    /// Observer (`/client`, `/consumer`)
    Downstream,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Upstream => "upstream",
            PeerRole::Downstream => "downstream",
        }
    }
}

/// Bookkeeping for one connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: Option<SocketAddr>,
    pub connected_at: Instant,
    cancel: CancellationToken,
}

/// A joined peer's view of the hub.
pub struct PeerHandle {
    pub id: u64,
    pub role: PeerRole,
    /// Frames this peer should forward to its socket
    pub inbox: Option<broadcast::Receiver<Message>>,
    /// Cancelled when the hub evicts the peer
    pub evicted: CancellationToken,
}

/// Fan-out hub shared by every relay connection.
pub struct RelayHub {
    mode: RelayMode,
    from_upstream: broadcast::Sender<Message>,
    from_downstream: broadcast::Sender<Message>,
    upstream: DashMap<u64, PeerInfo>,
    downstream: DashMap<u64, PeerInfo>,
    next_id: AtomicU64,
}

impl RelayHub {
    pub fn new(mode: RelayMode) -> Self {
        let (from_upstream, _) = broadcast::channel(FANOUT_CAPACITY);
        let (from_downstream, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            mode,
            from_upstream,
            from_downstream,
            upstream: DashMap::new(),
            downstream: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Register a peer.
    ///
    /// In simple mode a new upstream peer evicts the previous one.
    pub fn join(&self, role: PeerRole, addr: Option<SocketAddr>) -> PeerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let evicted = CancellationToken::new();

        if role == PeerRole::Upstream && self.mode == RelayMode::Simple {
            self.upstream.retain(|previous, info| {
                info!(peer_id = previous, "Replacing upstream peer");
                info.cancel.cancel();
                false
            });
        }

        let inbox = match (role, self.mode) {
            (PeerRole::Downstream, _) => Some(self.from_upstream.subscribe()),
            (PeerRole::Upstream, RelayMode::Debug) => Some(self.from_downstream.subscribe()),
            (PeerRole::Upstream, RelayMode::Simple) => None,
        };

        self.peers(role).insert(
            id,
            PeerInfo {
                addr,
                connected_at: Instant::now(),
                cancel: evicted.clone(),
            },
        );

        PeerHandle {
            id,
            role,
            inbox,
            evicted,
        }
    }

    /// Remove a peer; unknown ids are ignored.
    pub fn leave(&self, role: PeerRole, id: u64) {
        self.peers(role).remove(&id);
    }

    /// Fan a frame out to the opposite role.
    ///
    /// Returns how many peers will receive it. Downstream frames are
    /// dropped in simple mode.
    pub fn publish(&self, from: PeerRole, frame: Message) -> usize {
        match (from, self.mode) {
            (PeerRole::Upstream, _) => self.from_upstream.send(frame).unwrap_or(0),
            (PeerRole::Downstream, RelayMode::Debug) => {
                self.from_downstream.send(frame).unwrap_or(0)
            }
            (PeerRole::Downstream, RelayMode::Simple) => 0,
        }
    }

    pub fn upstream_count(&self) -> usize {
        self.upstream.len()
    }

    pub fn downstream_count(&self) -> usize {
        self.downstream.len()
    }

    pub fn is_connected(&self, role: PeerRole, id: u64) -> bool {
        self.peers(role).contains_key(&id)
    }

    fn peers(&self, role: PeerRole) -> &DashMap<u64, PeerInfo> {
        match role {
            PeerRole::Upstream => &self.upstream,
            PeerRole::Downstream => &self.downstream,
        }
    }
}
