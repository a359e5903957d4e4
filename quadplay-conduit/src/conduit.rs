use std::collections::VecDeque;

use indexmap::IndexMap;
use quadplay_format::{GraphValue, Transform, Untransform, deserialize, serialize};
use tracing::{debug, instrument, warn};

use crate::discovery::{DiscoveryHost, DiscoveryLink};
use crate::error::ConduitError;
use crate::netid::{NetId, NetIdKind, PeerAddress};
use crate::session::{NetworkStatus, Route, Session, WorkItem};
use crate::transport::{ConnectMetadata, ConnectionEvent, ConnectionId, Transport};

/// Handle to a conduit owned by a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConduitId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConduitStatus {
    Pending,
    Online,
    Offline,
    Closed,
}

/// Something that happened on a conduit, in arrival order.
#[derive(Debug, Clone)]
pub enum ConduitEvent {
    Join(NetId),
    Message { from: NetId, message: GraphValue },
    Leave(NetId),
}

#[derive(Debug, Clone)]
pub(crate) struct PeerLink {
    pub conn: ConnectionId,
    pub open: bool,
    /// A join event was queued for this peer.
    pub joined: bool,
}

#[derive(Debug)]
pub(crate) struct ConduitState {
    pub netid: NetId,
    pub status: ConduitStatus,
    pub events: VecDeque<ConduitEvent>,
    pub peers: IndexMap<NetId, PeerLink>,
    pub discovery: Option<DiscoveryLink>,
    pub attempts: u32,
    pub host: Option<DiscoveryHost>,
    /// Accepts dials addressed to this node.
    pub listener: bool,
}

impl ConduitState {
    fn new(netid: NetId, status: ConduitStatus, listener: bool) -> Self {
        ConduitState {
            netid,
            status,
            events: VecDeque::new(),
            peers: IndexMap::new(),
            discovery: None,
            attempts: 0,
            host: None,
            listener,
        }
    }

    /// Events are dropped once the conduit is closed.
    pub fn push_event(&mut self, event: ConduitEvent) {
        if self.status != ConduitStatus::Closed {
            self.events.push_back(event);
        }
    }

    /// Whether the conduit has neither a discovery link nor a dial in flight.
    pub fn needs_connect(&self) -> bool {
        if self.status == ConduitStatus::Closed || self.listener {
            return false;
        }
        match self.netid.kind() {
            NetIdKind::Group => self.discovery.is_none(),
            NetIdKind::Node => self.peers.is_empty(),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Opens a conduit to a group or to a single listening node.
    ///
    /// Initializes the session when needed. The conduit connects now if the
    /// relay is online, else as soon as it comes online.
    #[instrument(skip(self))]
    pub fn make_conduit(&mut self, netid: NetId) -> Result<ConduitId, ConduitError> {
        self.init(None)?;
        let id = self.insert_conduit(ConduitState::new(netid, ConduitStatus::Pending, false));
        if self.status == NetworkStatus::Online {
            self.connect(id)?;
        } else {
            self.queue_connect(id);
        }
        Ok(id)
    }

    /// Opens a conduit accepting dials addressed to this node, including
    /// ones that arrived before the call.
    #[instrument(skip(self))]
    pub fn listen(&mut self, netid: Option<NetId>) -> Result<ConduitId, ConduitError> {
        let node = self.init(None)?;
        let netid = netid.unwrap_or_else(|| node.clone());
        if netid != node {
            warn!(%netid, %node, "listening on a netid other than this node's");
        }
        let id = self.insert_conduit(ConduitState::new(netid.clone(), ConduitStatus::Online, true));

        let (matching, rest) = std::mem::take(&mut self.listen_queue)
            .into_iter()
            .partition::<Vec<_>, _>(|pending| pending.conduit_netid == netid);
        self.listen_queue = rest;
        for pending in matching {
            self.attach_peer(id, pending.conn, pending.from, pending.open);
        }
        Ok(id)
    }

    fn insert_conduit(&mut self, state: ConduitState) -> ConduitId {
        let id = ConduitId(self.next_conduit);
        self.next_conduit += 1;
        self.conduits.insert(id, state);
        self.open.insert(id);
        id
    }

    /// Sends `message` to every peer with an open connection. Returns how
    /// many peers it went to.
    pub fn send(&mut self, id: ConduitId, message: &GraphValue) -> Result<usize, ConduitError> {
        let Some(state) = self.conduits.get(&id) else {
            return self.released(id).map(|()| 0);
        };
        let targets: Vec<ConnectionId> = state.peers.values().filter(|l| l.open).map(|l| l.conn).collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let transform = self.handles.as_mut().map(|h| h as &mut dyn Transform);
        let packet = serialize(message, transform)?.into_bytes();
        for &conn in &targets {
            self.transport.send(conn, packet.clone());
        }
        Ok(targets.len())
    }

    /// Drains queued events in arrival order through the callbacks.
    pub fn iterate(
        &mut self,
        id: ConduitId,
        mut on_message: impl FnMut(GraphValue, &NetId),
        mut on_join: impl FnMut(&NetId),
        mut on_leave: impl FnMut(&NetId),
    ) -> Result<(), ConduitError> {
        for event in self.take_events(id)? {
            match event {
                ConduitEvent::Join(netid) => on_join(&netid),
                ConduitEvent::Message { from, message } => on_message(message, &from),
                ConduitEvent::Leave(netid) => on_leave(&netid),
            }
        }
        Ok(())
    }

    /// Drains queued events. A closed conduit is released once drained.
    pub fn take_events(&mut self, id: ConduitId) -> Result<Vec<ConduitEvent>, ConduitError> {
        let Some(state) = self.conduits.get_mut(&id) else {
            return self.released(id).map(|()| Vec::new());
        };
        let events = state.events.drain(..).collect();
        if state.status == ConduitStatus::Closed {
            self.conduits.remove(&id);
        }
        Ok(events)
    }

    /// Status as seen by the application: every live conduit reads as
    /// offline while the relay is away.
    pub fn conduit_status(&self, id: ConduitId) -> Result<ConduitStatus, ConduitError> {
        let Some(state) = self.conduits.get(&id) else {
            return self.released(id).map(|()| ConduitStatus::Closed);
        };
        if self.status == NetworkStatus::Offline && state.status != ConduitStatus::Closed {
            Ok(ConduitStatus::Offline)
        } else {
            Ok(state.status)
        }
    }

    pub fn conduit_netid(&self, id: ConduitId) -> Result<&NetId, ConduitError> {
        self.conduits
            .get(&id)
            .map(|state| &state.netid)
            .ok_or(ConduitError::UnknownConduit(id))
    }

    /// Peers currently attached to the conduit, open or not.
    pub fn peers(&self, id: ConduitId) -> Result<Vec<NetId>, ConduitError> {
        let Some(state) = self.conduits.get(&id) else {
            return self.released(id).map(|()| Vec::new());
        };
        Ok(state.peers.keys().cloned().collect())
    }

    fn released(&self, id: ConduitId) -> Result<(), ConduitError> {
        if id.0 < self.next_conduit {
            Ok(())
        } else {
            Err(ConduitError::UnknownConduit(id))
        }
    }

    /// Closes the conduit. Leave events for its peers stay queued until
    /// drained.
    #[instrument(skip(self))]
    pub fn close(&mut self, id: ConduitId) -> Result<(), ConduitError> {
        if !self.conduits.contains_key(&id) {
            return self.released(id);
        }
        self.close_conduit(id);
        Ok(())
    }

    pub(crate) fn close_conduit(&mut self, id: ConduitId) {
        self.open.remove(&id);
        self.work_queue.retain(|item| *item != WorkItem::Connect(id));
        let Some(state) = self.conduits.get_mut(&id) else {
            return;
        };
        if state.status == ConduitStatus::Closed {
            return;
        }

        let peers = std::mem::take(&mut state.peers);
        for (netid, link) in peers {
            if link.joined {
                state.events.push_back(ConduitEvent::Leave(netid));
            }
            self.routes.remove(&link.conn);
            self.transport.close(link.conn);
        }
        state.status = ConduitStatus::Closed;

        let discovery = state.discovery.take();
        let host = state.host.take();
        let netid = state.netid.clone();
        if let Some(link) = discovery {
            self.routes.remove(&link.conn);
            let address = PeerAddress::new(&netid, &self.isolation);
            self.forget_pending_discovery(&address, id);
            self.transport.close(link.conn);
        }
        if let Some(host) = host {
            self.teardown_host(host);
        }
        debug!(?id, %netid, "conduit closed");
    }

    /// Dials `netid` on behalf of the conduit. Group peers count as joined
    /// immediately; a node dial joins when its connection opens.
    pub(crate) fn dial_peer(&mut self, id: ConduitId, netid: NetId, joined: bool) {
        let Some(state) = self.conduits.get(&id) else {
            return;
        };
        if state.peers.contains_key(&netid) {
            return;
        }
        let metadata = ConnectMetadata {
            conduit_netid: Some(state.netid.clone()),
        };
        let address = PeerAddress::new(&netid, &self.isolation);
        let conn = self.transport.connect(&address, metadata);
        self.routes.insert(conn, Route::Peer { conduit: id, netid: netid.clone() });

        let Some(state) = self.conduits.get_mut(&id) else {
            return;
        };
        if joined {
            state.push_event(ConduitEvent::Join(netid.clone()));
        }
        state.peers.insert(netid, PeerLink { conn, open: false, joined });
    }

    /// Adopts a connection a peer dialed to us.
    pub(crate) fn attach_peer(&mut self, id: ConduitId, conn: ConnectionId, from: NetId, open: bool) {
        let Some(state) = self.conduits.get_mut(&id) else {
            self.transport.close(conn);
            return;
        };
        let previous = state.peers.insert(from.clone(), PeerLink { conn, open, joined: true });
        match previous {
            Some(old) => {
                debug!(%from, "peer redialed, replacing connection");
                self.routes.remove(&old.conn);
                self.transport.close(old.conn);
            }
            None => state.push_event(ConduitEvent::Join(from.clone())),
        }
        self.routes.insert(conn, Route::Peer { conduit: id, netid: from });
    }

    pub(crate) fn on_peer_event(&mut self, id: ConduitId, conn: ConnectionId, netid: NetId, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => {
                let Some(state) = self.conduits.get_mut(&id) else {
                    return;
                };
                let dialer = !state.listener && state.netid == netid;
                let Some(link) = state.peers.get_mut(&netid) else {
                    return;
                };
                link.open = true;
                if dialer && !link.joined {
                    link.joined = true;
                    state.push_event(ConduitEvent::Join(netid));
                    if state.status == ConduitStatus::Pending {
                        state.status = ConduitStatus::Online;
                    }
                }
            }
            ConnectionEvent::Data(bytes) => {
                let message = match self.decode(&bytes) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(%netid, %err, "dropped undecodable message");
                        return;
                    }
                };
                if let Some(state) = self.conduits.get_mut(&id) {
                    state.push_event(ConduitEvent::Message { from: netid, message });
                }
            }
            ConnectionEvent::Closed | ConnectionEvent::Error(_) => {
                if let ConnectionEvent::Error(err) = &event {
                    debug!(%netid, %err, "peer connection error");
                }
                self.routes.remove(&conn);
                let Some(state) = self.conduits.get_mut(&id) else {
                    return;
                };
                if state.peers.get(&netid).is_some_and(|link| link.conn == conn) {
                    if let Some(link) = state.peers.shift_remove(&netid) {
                        if link.joined {
                            state.push_event(ConduitEvent::Leave(netid));
                        }
                    }
                }
            }
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<GraphValue, ConduitError> {
        let text = std::str::from_utf8(bytes).map_err(|err| ConduitError::Protocol(err.to_string()))?;
        let untransform = self.handles.as_mut().map(|h| h as &mut dyn Untransform);
        Ok(deserialize(text, untransform)?)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::SessionConfig;
    use crate::netid::IsolationToken;
    use crate::transport::{HostId, RelayEvent, TransportEvent};

    #[derive(Default)]
    struct Wire {
        sent: Vec<(ConnectionId, Vec<u8>)>,
        closed: Vec<ConnectionId>,
        next: u64,
    }

    impl Transport for Wire {
        fn open_peer(&mut self, _: &PeerAddress) {}
        fn reconnect(&mut self) {}
        fn destroy(&mut self) {}
        fn connect(&mut self, _: &PeerAddress, _: ConnectMetadata) -> ConnectionId {
            self.next += 1;
            ConnectionId(self.next)
        }
        fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>) {
            self.sent.push((conn, bytes));
        }
        fn close(&mut self, conn: ConnectionId) {
            self.closed.push(conn);
        }
        fn open_host(&mut self, _: &PeerAddress) -> HostId {
            HostId(0)
        }
        fn destroy_host(&mut self, _: HostId) {}
    }

    fn online() -> Session<Wire> {
        let mut s = Session::new(SessionConfig::default(), Wire::default(), IsolationToken::new("t"));
        s.init(Some(NetId::node("me"))).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        s
    }

    fn incoming(s: &mut Session<Wire>, conn: u64, from: &str, to: NetId) {
        let from = PeerAddress::new(&NetId::node(from), &s.isolation);
        s.handle(TransportEvent::Incoming {
            conn: ConnectionId(conn),
            from,
            metadata: ConnectMetadata { conduit_netid: Some(to) },
        })
        .unwrap();
    }

    fn event(s: &mut Session<Wire>, conn: u64, event: ConnectionEvent) {
        s.handle(TransportEvent::Connection {
            conn: ConnectionId(conn),
            event,
        })
        .unwrap();
    }

    fn describe(events: Vec<ConduitEvent>) -> Vec<String> {
        events
            .into_iter()
            .map(|e| match e {
                ConduitEvent::Join(n) => format!("join {n}"),
                ConduitEvent::Message { from, message } => format!("message {from} {message:?}"),
                ConduitEvent::Leave(n) => format!("leave {n}"),
            })
            .collect()
    }

    #[test]
    fn node_dial_joins_on_open() {
        let mut s = online();
        let id = s.make_conduit(NetId::node("server")).unwrap();
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Pending);
        assert!(s.take_events(id).unwrap().is_empty());

        event(&mut s, 1, ConnectionEvent::Open);
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Online);
        assert_eq!(describe(s.take_events(id).unwrap()), ["join node_netid server"]);
    }

    #[test]
    fn events_keep_arrival_order() {
        let mut s = online();
        let id = s.listen(None).unwrap();
        let me = s.node_netid().cloned().unwrap();
        incoming(&mut s, 7, "a", me);
        event(&mut s, 7, ConnectionEvent::Open);
        let packet = serialize(&GraphValue::from(1.0), None).unwrap().into_bytes();
        event(&mut s, 7, ConnectionEvent::Data(packet));
        event(&mut s, 7, ConnectionEvent::Closed);

        let seen = RefCell::new(Vec::new());
        s.iterate(
            id,
            |message, from| seen.borrow_mut().push(format!("message {from} {}", message.as_f64().unwrap())),
            |netid| seen.borrow_mut().push(format!("join {netid}")),
            |netid| seen.borrow_mut().push(format!("leave {netid}")),
        )
        .unwrap();
        assert_eq!(
            seen.into_inner(),
            ["join node_netid a", "message node_netid a 1", "leave node_netid a"]
        );
    }

    #[test]
    fn listen_adopts_earlier_dials() {
        let mut s = online();
        let me = s.node_netid().cloned().unwrap();
        incoming(&mut s, 3, "early", me);
        event(&mut s, 3, ConnectionEvent::Open);
        assert_eq!(s.listen_queue.len(), 1);

        let id = s.listen(None).unwrap();
        assert!(s.listen_queue.is_empty());
        assert_eq!(s.peers(id).unwrap(), vec![NetId::node("early")]);
        assert_eq!(s.send(id, &GraphValue::from("hi")).unwrap(), 1);
        assert_eq!(s.transport.sent[0].0, ConnectionId(3));
    }

    #[test]
    fn send_skips_unopened_connections() {
        let mut s = online();
        let id = s.make_conduit(NetId::node("server")).unwrap();
        assert_eq!(s.send(id, &GraphValue::from(1.0)).unwrap(), 0);
        event(&mut s, 1, ConnectionEvent::Open);
        assert_eq!(s.send(id, &GraphValue::from(1.0)).unwrap(), 1);
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let mut s = online();
        let id = s.make_conduit(NetId::node("server")).unwrap();
        event(&mut s, 1, ConnectionEvent::Open);
        s.take_events(id).unwrap();

        event(&mut s, 1, ConnectionEvent::Data(b"{not a graph".to_vec()));
        event(&mut s, 1, ConnectionEvent::Data(vec![0xff, 0xfe]));
        assert!(s.take_events(id).unwrap().is_empty());
    }

    #[test]
    fn close_queues_leaves_then_releases() {
        let mut s = online();
        let id = s.listen(None).unwrap();
        let me = s.node_netid().cloned().unwrap();
        incoming(&mut s, 5, "a", me.clone());
        incoming(&mut s, 6, "b", me);
        s.take_events(id).unwrap();

        s.close(id).unwrap();
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Closed);
        assert_eq!(s.transport.closed, [ConnectionId(5), ConnectionId(6)]);

        event(&mut s, 5, ConnectionEvent::Data(b"late".to_vec()));
        assert_eq!(
            describe(s.take_events(id).unwrap()),
            ["leave node_netid a", "leave node_netid b"]
        );
        assert!(s.take_events(id).unwrap().is_empty());
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Closed);
        assert!(s.close(id).is_ok());
    }

    #[test]
    fn unknown_conduit_is_an_error() {
        let mut s = online();
        let bogus = ConduitId(99);
        assert!(matches!(s.conduit_status(bogus), Err(ConduitError::UnknownConduit(_))));
        assert!(matches!(s.send(bogus, &GraphValue::Null), Err(ConduitError::UnknownConduit(_))));
        assert!(matches!(s.close(bogus), Err(ConduitError::UnknownConduit(_))));
    }

    #[test]
    fn status_is_masked_while_offline() {
        let mut s = online();
        let id = s.listen(None).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Disconnected)).unwrap();
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Offline);
        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        assert_eq!(s.conduit_status(id).unwrap(), ConduitStatus::Online);
    }

    #[test]
    fn incoming_for_unknown_conduit_is_closed() {
        let mut s = online();
        incoming(&mut s, 9, "a", NetId::group("nobody"));
        assert_eq!(s.transport.closed, [ConnectionId(9)]);
    }
}
