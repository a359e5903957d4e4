//! Group membership through an elected rendezvous host.
//!
//! Every group netid maps to one rendezvous address. Members dial it to
//! learn about each other. When nobody answers, members race after a random
//! delay to bind the address themselves; the winner hosts the rendezvous
//! and everyone redials. Two hosts may briefly coexist during the race.

use std::time::Duration;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conduit::{ConduitId, ConduitStatus};
use crate::error::ConduitError;
use crate::netid::{NetId, PeerAddress};
use crate::session::{NetworkStatus, Route, Session, Timer};
use crate::transport::{ConnectMetadata, ConnectionEvent, ConnectionId, HostEvent, HostId, Transport};

/// Messages sent by a rendezvous host to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscoveryMessage {
    /// Every other current member of the group.
    PeerList { peers: Vec<NetId> },
}

impl DiscoveryMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ConduitError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| ConduitError::Protocol(e.to_string()))?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ConduitError> {
        ciborium::from_reader(bytes).map_err(|e| ConduitError::Protocol(e.to_string()))
    }
}

/// A member's connection to its group's rendezvous.
#[derive(Debug, Clone)]
pub(crate) struct DiscoveryLink {
    pub conn: ConnectionId,
    pub open: bool,
}

/// Rendezvous state of a group this session hosts.
#[derive(Debug)]
pub(crate) struct DiscoveryHost {
    pub host: HostId,
    pub open: bool,
    pub clients: IndexMap<NetId, ConnectionId>,
}

impl<T: Transport> Session<T> {
    /// Whether this session currently hosts the conduit's rendezvous.
    pub fn hosts_rendezvous(&self, id: ConduitId) -> bool {
        self.conduits
            .get(&id)
            .and_then(|state| state.host.as_ref())
            .is_some_and(|hosted| hosted.open)
    }

    fn rendezvous(&self, group: &NetId) -> PeerAddress {
        PeerAddress::new(group, &self.isolation)
    }

    pub(crate) fn forget_pending_discovery(&mut self, address: &PeerAddress, id: ConduitId) {
        if let Some(waiting) = self.pending_discovery.get_mut(address) {
            waiting.retain(|conduit| *conduit != id);
            if waiting.is_empty() {
                self.pending_discovery.remove(address);
            }
        }
    }

    pub(crate) fn connect_discovery(&mut self, id: ConduitId) {
        let Some(state) = self.conduits.get(&id) else {
            return;
        };
        let address = self.rendezvous(&state.netid);
        if let Some(old) = self.conduits.get_mut(&id).and_then(|s| s.discovery.take()) {
            self.routes.remove(&old.conn);
            self.transport.close(old.conn);
        }

        debug!(?id, %address, "dialing rendezvous");
        let conn = self.transport.connect(&address, ConnectMetadata::default());
        self.routes.insert(conn, Route::Discovery { conduit: id });
        let waiting = self.pending_discovery.entry(address).or_default();
        if !waiting.contains(&id) {
            waiting.push(id);
        }

        let Some(state) = self.conduits.get_mut(&id) else {
            return;
        };
        state.attempts += 1;
        state.discovery = Some(DiscoveryLink { conn, open: false });
        let attempt = state.attempts;
        self.schedule(
            self.config.discovery_connection_timeout(),
            Timer::DiscoveryTimeout { conduit: id, attempt },
        );
    }

    /// The rendezvous did not answer: retry later, or race to host it.
    pub(crate) fn discovery_failed(&mut self, id: ConduitId) {
        let Some(state) = self.conduits.get_mut(&id) else {
            return;
        };
        if state.status == ConduitStatus::Closed {
            debug!(?id, "ignored discovery failure after close");
            return;
        }
        let link = state.discovery.take();
        let address = PeerAddress::new(&state.netid, &self.isolation);
        if let Some(link) = link {
            self.routes.remove(&link.conn);
            self.transport.close(link.conn);
        }
        self.forget_pending_discovery(&address, id);

        if self.status == NetworkStatus::Offline {
            info!(?id, "rendezvous unreachable while offline, retrying when online");
            self.queue_connect(id);
            return;
        }

        let max = self.config.takeover_max_delay();
        let delay = if max.is_zero() {
            Duration::ZERO
        } else {
            self.rng.gen_range(Duration::ZERO..max)
        };
        debug!(?id, ?delay, "rendezvous unavailable, scheduling takeover");
        self.schedule(delay, Timer::DiscoveryTakeover { conduit: id });
    }

    pub(crate) fn on_discovery_timeout(&mut self, id: ConduitId, attempt: u32) {
        let Some(state) = self.conduits.get(&id) else {
            return;
        };
        let hung = state.status == ConduitStatus::Pending
            && state.attempts == attempt
            && state.discovery.as_ref().is_some_and(|link| !link.open);
        if hung {
            info!(?id, attempt, "rendezvous dial timed out");
            self.discovery_failed(id);
        }
    }

    pub(crate) fn on_discovery_takeover(&mut self, id: ConduitId) {
        let Some(state) = self.conduits.get(&id) else {
            return;
        };
        if state.status == ConduitStatus::Closed || state.discovery.is_some() {
            return;
        }
        if self.status != NetworkStatus::Online {
            self.queue_connect(id);
            return;
        }
        if state.host.is_some() {
            let delay = self.config.discovery_initial_reconnect_delay();
            self.schedule(delay, Timer::DiscoveryReconnect { conduit: id });
            return;
        }

        let address = self.rendezvous(&state.netid);
        info!(?id, %address, "trying to host rendezvous");
        let host = self.transport.open_host(&address);
        self.hosts.insert(host, id);
        if let Some(state) = self.conduits.get_mut(&id) {
            state.host = Some(DiscoveryHost {
                host,
                open: false,
                clients: IndexMap::new(),
            });
        }
    }

    pub(crate) fn on_discovery_reconnect(&mut self, id: ConduitId) {
        let Some(state) = self.conduits.get(&id) else {
            return;
        };
        if state.status == ConduitStatus::Closed || state.discovery.is_some() {
            return;
        }
        if self.status == NetworkStatus::Online {
            self.connect_discovery(id);
        } else {
            self.queue_connect(id);
        }
    }

    pub(crate) fn on_discovery_event(&mut self, id: ConduitId, conn: ConnectionId, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => {
                let Some(state) = self.conduits.get_mut(&id) else {
                    return;
                };
                if let Some(link) = state.discovery.as_mut().filter(|l| l.conn == conn) {
                    link.open = true;
                }
                let address = PeerAddress::new(&state.netid, &self.isolation);
                self.forget_pending_discovery(&address, id);
                debug!(?id, "connected to rendezvous");
            }
            ConnectionEvent::Data(bytes) => match DiscoveryMessage::decode(&bytes) {
                Ok(DiscoveryMessage::PeerList { peers }) => self.on_peer_list(id, peers),
                Err(err) => warn!(?id, %err, "dropped malformed discovery message"),
            },
            ConnectionEvent::Closed => {
                self.routes.remove(&conn);
                let Some(state) = self.conduits.get_mut(&id) else {
                    return;
                };
                if state.status == ConduitStatus::Closed || !state.discovery.as_ref().is_some_and(|l| l.conn == conn) {
                    return;
                }
                state.discovery = None;
                info!(?id, "rendezvous connection closed, redialing");
                if self.status == NetworkStatus::Online {
                    self.connect_discovery(id);
                } else {
                    self.queue_connect(id);
                }
            }
            ConnectionEvent::Error(err) => {
                let current = self
                    .conduits
                    .get(&id)
                    .and_then(|s| s.discovery.as_ref())
                    .is_some_and(|l| l.conn == conn);
                if current {
                    debug!(?id, %err, "rendezvous connection error");
                    self.discovery_failed(id);
                } else {
                    self.routes.remove(&conn);
                }
            }
        }
    }

    fn on_peer_list(&mut self, id: ConduitId, peers: Vec<NetId>) {
        debug!(?id, count = peers.len(), "received peer list");
        for netid in peers {
            if Some(&netid) == self.node_netid.as_ref() {
                continue;
            }
            self.dial_peer(id, netid, true);
        }
        if let Some(state) = self.conduits.get_mut(&id) {
            if state.status == ConduitStatus::Pending {
                state.status = ConduitStatus::Online;
                info!(?id, peers = state.peers.len(), "group conduit online");
            }
        }
    }

    pub(crate) fn on_host(&mut self, host: HostId, event: HostEvent) {
        let Some(&id) = self.hosts.get(&host) else {
            debug!(?host, "event for unknown host");
            return;
        };
        match event {
            HostEvent::Open => {
                info!(?id, "hosting rendezvous");
                if let Some(hosted) = self.conduits.get_mut(&id).and_then(|s| s.host.as_mut()) {
                    hosted.open = true;
                }
                let delay = self.config.discovery_initial_reconnect_delay();
                self.schedule(delay, Timer::DiscoveryReconnect { conduit: id });
            }
            HostEvent::Error(err) => {
                info!(?id, %err, "could not host rendezvous");
                let hosted = self.conduits.get_mut(&id).and_then(|s| s.host.take());
                match hosted {
                    Some(hosted) => self.teardown_host(hosted),
                    None => {
                        self.hosts.remove(&host);
                        self.transport.destroy_host(host);
                    }
                }
                let delay = self.config.discovery_initial_reconnect_delay();
                self.schedule(delay, Timer::DiscoveryReconnect { conduit: id });
            }
            HostEvent::Incoming { conn, from } => match from.to_netid(&self.isolation) {
                Ok(netid) => {
                    self.routes.insert(conn, Route::HostClient { conduit: id, netid });
                }
                Err(err) => {
                    warn!(%err, "rejected rendezvous client");
                    self.transport.close(conn);
                }
            },
        }
    }

    pub(crate) fn on_host_client_event(
        &mut self,
        id: ConduitId,
        conn: ConnectionId,
        netid: NetId,
        event: ConnectionEvent,
    ) {
        let Some(hosted) = self.conduits.get_mut(&id).and_then(|s| s.host.as_mut()) else {
            self.routes.remove(&conn);
            return;
        };
        match event {
            ConnectionEvent::Open => {
                let others: Vec<NetId> = hosted.clients.keys().filter(|n| **n != netid).cloned().collect();
                hosted.clients.insert(netid, conn);
                match (DiscoveryMessage::PeerList { peers: others }).encode() {
                    Ok(bytes) => self.transport.send(conn, bytes),
                    Err(err) => warn!(%err, "could not encode peer list"),
                }
            }
            ConnectionEvent::Data(_) => debug!(%netid, "ignored data from rendezvous client"),
            ConnectionEvent::Closed | ConnectionEvent::Error(_) => {
                if hosted.clients.get(&netid) == Some(&conn) {
                    hosted.clients.shift_remove(&netid);
                }
                self.routes.remove(&conn);
            }
        }
    }

    /// Drops every client and releases the rendezvous address.
    pub(crate) fn teardown_host(&mut self, hosted: DiscoveryHost) {
        for conn in hosted.clients.into_values() {
            self.routes.remove(&conn);
            self.transport.close(conn);
        }
        let owner = self.hosts.remove(&hosted.host);
        self.routes
            .retain(|_, route| !matches!(route, Route::HostClient { conduit, .. } if Some(*conduit) == owner));
        self.transport.destroy_host(hosted.host);
    }
}
