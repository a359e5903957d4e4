//! An in-process relay connecting any number of sessions.
//!
//! Each [`MemoryTransport`] is one endpoint; the events it produces arrive
//! on the receiver returned next to it by [`MemoryRelay::endpoint`]. Dials
//! complete immediately, so a dial's `Incoming` and `Open` events are
//! queued before `connect` returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::netid::PeerAddress;
use crate::transport::{
    ConnectMetadata, ConnectionEvent, ConnectionId, HostEvent, HostId, RelayEvent, Transport, TransportError,
    TransportErrorKind, TransportEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

#[derive(Debug)]
struct Endpoint {
    events: UnboundedSender<TransportEvent>,
    reachable: bool,
    /// Address requested through `open_peer`, bound or not.
    address: Option<PeerAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Peer(EndpointId),
    Host(EndpointId, HostId),
}

#[derive(Debug, Clone, Copy)]
struct Link {
    owner: EndpointId,
    remote: ConnectionId,
    host: Option<HostId>,
}

#[derive(Debug, Default)]
struct RelayState {
    endpoints: Vec<Endpoint>,
    bindings: HashMap<PeerAddress, Binding>,
    links: HashMap<ConnectionId, Link>,
    hosts: HashMap<HostId, (EndpointId, PeerAddress)>,
    next_id: u64,
}

impl RelayState {
    fn emit(&self, endpoint: EndpointId, event: TransportEvent) {
        if self.endpoints[endpoint.0].events.send(event).is_err() {
            trace!(?endpoint, "endpoint receiver dropped");
        }
    }

    fn relay_error(&self, endpoint: EndpointId, kind: TransportErrorKind, peer: &PeerAddress, message: &str) {
        let err = TransportError::new(kind, message).with_peer(peer.clone());
        self.emit(endpoint, TransportEvent::Relay(RelayEvent::Error(err)));
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn bound_to(&self, endpoint: EndpointId) -> Option<&PeerAddress> {
        let address = self.endpoints[endpoint.0].address.as_ref()?;
        (self.bindings.get(address) == Some(&Binding::Peer(endpoint))).then_some(address)
    }

    fn try_bind(&mut self, endpoint: EndpointId) {
        let Some(address) = self.endpoints[endpoint.0].address.clone() else {
            return;
        };
        if !self.endpoints[endpoint.0].reachable {
            self.relay_error(endpoint, TransportErrorKind::Network, &address, "relay unreachable");
            return;
        }
        match self.bindings.get(&address) {
            Some(Binding::Peer(owner)) if *owner == endpoint => {
                self.emit(endpoint, TransportEvent::Relay(RelayEvent::Open));
            }
            Some(_) => self.relay_error(endpoint, TransportErrorKind::UnavailableId, &address, "id is taken"),
            None => {
                self.bindings.insert(address, Binding::Peer(endpoint));
                self.emit(endpoint, TransportEvent::Relay(RelayEvent::Open));
            }
        }
    }

    /// Drops one end of a connection and tells the other end.
    fn close_link(&mut self, conn: ConnectionId) {
        let Some(link) = self.links.remove(&conn) else {
            return;
        };
        if let Some(remote) = self.links.remove(&link.remote) {
            let event = TransportEvent::Connection {
                conn: link.remote,
                event: ConnectionEvent::Closed,
            };
            self.emit(remote.owner, event);
        }
    }
}

/// Shared in-process relay. Cloning yields another handle to the same relay.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Rc<RefCell<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint to the relay.
    pub fn endpoint(&self) -> (MemoryTransport, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.borrow_mut();
        let id = EndpointId(state.endpoints.len());
        state.endpoints.push(Endpoint {
            events: tx,
            reachable: true,
            address: None,
        });
        let transport = MemoryTransport {
            state: self.state.clone(),
            id,
        };
        (transport, rx)
    }

    /// Cuts an endpoint off the relay, or lets it back in. Connections it
    /// already has stay up; a cut endpoint is told it was disconnected.
    pub fn set_reachable(&self, endpoint: EndpointId, reachable: bool) {
        let mut state = self.state.borrow_mut();
        let was = std::mem::replace(&mut state.endpoints[endpoint.0].reachable, reachable);
        if was && !reachable {
            state.emit(endpoint, TransportEvent::Relay(RelayEvent::Disconnected));
        }
    }

    /// Makes the relay drop the endpoint's registration for good.
    pub fn evict(&self, endpoint: EndpointId) {
        let mut state = self.state.borrow_mut();
        state.bindings.retain(|_, binding| *binding != Binding::Peer(endpoint));
        state.emit(endpoint, TransportEvent::Relay(RelayEvent::Closed));
    }

    /// Delivers an arbitrary event to an endpoint.
    pub fn inject(&self, endpoint: EndpointId, event: TransportEvent) {
        self.state.borrow().emit(endpoint, event);
    }

    pub fn is_bound(&self, address: &PeerAddress) -> bool {
        self.state.borrow().bindings.contains_key(address)
    }
}

/// One endpoint of a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryTransport {
    state: Rc<RefCell<RelayState>>,
    id: EndpointId,
}

impl MemoryTransport {
    pub fn id(&self) -> EndpointId {
        self.id
    }
}

impl Transport for MemoryTransport {
    fn open_peer(&mut self, address: &PeerAddress) {
        let mut state = self.state.borrow_mut();
        state.endpoints[self.id.0].address = Some(address.clone());
        state.try_bind(self.id);
    }

    fn reconnect(&mut self) {
        self.state.borrow_mut().try_bind(self.id);
    }

    fn destroy(&mut self) {
        let mut state = self.state.borrow_mut();
        let me = self.id;
        state.bindings.retain(|_, binding| match binding {
            Binding::Peer(owner) | Binding::Host(owner, _) => *owner != me,
        });
        state.hosts.retain(|_, (owner, _)| *owner != me);
        let mut owned: Vec<ConnectionId> = state
            .links
            .iter()
            .filter(|(_, link)| link.owner == me)
            .map(|(conn, _)| *conn)
            .collect();
        owned.sort();
        for conn in owned {
            state.close_link(conn);
        }
        state.endpoints[me.0].address = None;
        state.emit(me, TransportEvent::Relay(RelayEvent::Closed));
    }

    fn connect(&mut self, to: &PeerAddress, metadata: ConnectMetadata) -> ConnectionId {
        let mut state = self.state.borrow_mut();
        let local = ConnectionId(state.next_id());

        let Some(from) = state.bound_to(self.id).cloned() else {
            state.relay_error(self.id, TransportErrorKind::Network, to, "not registered with relay");
            return local;
        };
        if !state.endpoints[self.id.0].reachable {
            state.relay_error(self.id, TransportErrorKind::Network, to, "relay unreachable");
            return local;
        }
        let target = match state.bindings.get(to) {
            Some(&binding) => binding,
            None => {
                state.relay_error(self.id, TransportErrorKind::PeerUnavailable, to, "could not connect to peer");
                return local;
            }
        };
        let (owner, host) = match target {
            Binding::Peer(owner) => (owner, None),
            Binding::Host(owner, host) => (owner, Some(host)),
        };
        if !state.endpoints[owner.0].reachable {
            state.relay_error(self.id, TransportErrorKind::PeerUnavailable, to, "could not connect to peer");
            return local;
        }

        let remote = ConnectionId(state.next_id());
        state.links.insert(local, Link { owner: self.id, remote, host: None });
        state.links.insert(remote, Link { owner, remote: local, host });

        let incoming = match host {
            None => TransportEvent::Incoming {
                conn: remote,
                from: from.clone(),
                metadata,
            },
            Some(host) => TransportEvent::Host {
                host,
                event: HostEvent::Incoming { conn: remote, from },
            },
        };
        state.emit(owner, incoming);
        let open = |conn| TransportEvent::Connection {
            conn,
            event: ConnectionEvent::Open,
        };
        state.emit(owner, open(remote));
        state.emit(self.id, open(local));
        local
    }

    fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>) {
        let state = self.state.borrow();
        let Some(link) = state.links.get(&conn) else {
            trace!(?conn, "send on closed connection");
            return;
        };
        if let Some(remote) = state.links.get(&link.remote) {
            let event = TransportEvent::Connection {
                conn: link.remote,
                event: ConnectionEvent::Data(bytes),
            };
            state.emit(remote.owner, event);
        }
    }

    fn close(&mut self, conn: ConnectionId) {
        self.state.borrow_mut().close_link(conn);
    }

    fn open_host(&mut self, address: &PeerAddress) -> HostId {
        let mut state = self.state.borrow_mut();
        let host = HostId(state.next_id());
        let event = if state.bindings.contains_key(address) {
            let err = TransportError::new(TransportErrorKind::UnavailableId, "id is taken");
            HostEvent::Error(err.with_peer(address.clone()))
        } else if !state.endpoints[self.id.0].reachable {
            HostEvent::Error(TransportError::new(TransportErrorKind::Network, "relay unreachable"))
        } else {
            state.bindings.insert(address.clone(), Binding::Host(self.id, host));
            state.hosts.insert(host, (self.id, address.clone()));
            HostEvent::Open
        };
        state.emit(self.id, TransportEvent::Host { host, event });
        host
    }

    fn destroy_host(&mut self, host: HostId) {
        let mut state = self.state.borrow_mut();
        if let Some((_, address)) = state.hosts.remove(&host) {
            if state.bindings.get(&address) == Some(&Binding::Host(self.id, host)) {
                state.bindings.remove(&address);
            }
        }
        let mut served: Vec<ConnectionId> = state
            .links
            .iter()
            .filter(|(_, link)| link.host == Some(host))
            .map(|(conn, _)| *conn)
            .collect();
        served.sort();
        for conn in served {
            state.close_link(conn);
        }
    }
}
