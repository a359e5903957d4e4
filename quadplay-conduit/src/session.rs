//! The per-process network session.
//!
//! A [`Session`] owns the relay registration, every conduit, and the routing
//! of transport connections to conduits. It never blocks and never performs
//! I/O on its own: callers feed it [`TransportEvent`]s and fire the
//! [`Timer`]s it asks for (see [`Session::take_timers`]).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use quadplay_format::HandleRegistry;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, instrument, warn};

use crate::conduit::{ConduitId, ConduitState, ConduitStatus};
use crate::config::SessionConfig;
use crate::error::ConduitError;
use crate::netid::{IsolationToken, NetId, NetIdKind, PeerAddress};
use crate::transport::{
    ConnectionEvent, ConnectionId, ErrorClass, HostId, RelayEvent, Transport, TransportError,
    TransportEvent,
};

/// Connection state with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Uninitialized,
    /// Waiting for the relay to accept the registration.
    Pending,
    Online,
    /// Lost the relay; periodically reconnecting.
    Offline,
}

/// A deferred callback requested by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    ReconnectRelay { generation: u64 },
    DiscoveryTimeout { conduit: ConduitId, attempt: u32 },
    DiscoveryTakeover { conduit: ConduitId },
    DiscoveryReconnect { conduit: ConduitId },
}

/// What a transport connection belongs to.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    Peer { conduit: ConduitId, netid: NetId },
    Discovery { conduit: ConduitId },
    /// A client of a discovery rendezvous this session hosts.
    HostClient { conduit: ConduitId, netid: NetId },
    /// Dialed this node before any listener existed.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItem {
    Connect(ConduitId),
}

#[derive(Debug)]
pub(crate) struct PendingIncoming {
    pub conn: ConnectionId,
    pub from: NetId,
    pub conduit_netid: NetId,
    pub open: bool,
}

pub struct Session<T: Transport> {
    pub(crate) config: SessionConfig,
    pub(crate) transport: T,
    pub(crate) isolation: IsolationToken,
    pub(crate) status: NetworkStatus,
    pub(crate) node_netid: Option<NetId>,
    pub(crate) conduits: HashMap<ConduitId, ConduitState>,
    /// Conduits not yet closed, in creation order.
    pub(crate) open: BTreeSet<ConduitId>,
    pub(crate) next_conduit: u64,
    pub(crate) routes: HashMap<ConnectionId, Route>,
    pub(crate) hosts: HashMap<HostId, ConduitId>,
    /// Conduits with a rendezvous dial in flight, by rendezvous address.
    pub(crate) pending_discovery: HashMap<PeerAddress, Vec<ConduitId>>,
    pub(crate) work_queue: VecDeque<WorkItem>,
    pub(crate) listen_queue: Vec<PendingIncoming>,
    reconnect_generation: u64,
    reconnect_armed: bool,
    timers: Vec<(Duration, Timer)>,
    pub(crate) rng: StdRng,
    pub(crate) handles: Option<HandleRegistry>,
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: T, isolation: IsolationToken) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Session {
            config,
            transport,
            isolation,
            status: NetworkStatus::Uninitialized,
            node_netid: None,
            conduits: HashMap::new(),
            open: BTreeSet::new(),
            next_conduit: 0,
            routes: HashMap::new(),
            hosts: HashMap::new(),
            pending_discovery: HashMap::new(),
            work_queue: VecDeque::new(),
            listen_queue: Vec::new(),
            reconnect_generation: 0,
            reconnect_armed: false,
            timers: Vec::new(),
            rng,
            handles: None,
        }
    }

    /// Named resources that travel by name in conduit messages.
    pub fn with_handles(mut self, handles: HandleRegistry) -> Self {
        self.handles = Some(handles);
        self
    }

    pub fn handles_mut(&mut self) -> Option<&mut HandleRegistry> {
        self.handles.as_mut()
    }

    /// Registers with the relay. Does nothing once initialized.
    ///
    /// Without an explicit netid, a node netid kept by
    /// [`reset`](Self::reset) is reused, else a random one is drawn.
    #[instrument(skip(self))]
    pub fn init(&mut self, netid: Option<NetId>) -> Result<NetId, ConduitError> {
        if self.status != NetworkStatus::Uninitialized {
            if let Some(netid) = &self.node_netid {
                return Ok(netid.clone());
            }
        }

        let netid = match netid.or_else(|| self.node_netid.clone()) {
            Some(netid) if netid.kind() == NetIdKind::Node => netid,
            Some(netid) => return Err(ConduitError::IllegalNetId(netid.to_string())),
            None => NetId::random_node(),
        };

        let address = PeerAddress::new(&netid, &self.isolation);
        self.node_netid = Some(netid.clone());
        self.status = NetworkStatus::Pending;
        info!(%netid, "registering with relay");
        self.transport.open_peer(&address);
        Ok(netid)
    }

    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    pub fn node_netid(&self) -> Option<&NetId> {
        self.node_netid.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Timers requested since the last call, each with its delay.
    pub fn take_timers(&mut self) -> Vec<(Duration, Timer)> {
        std::mem::take(&mut self.timers)
    }

    pub(crate) fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.timers.push((delay, timer));
    }

    #[instrument(skip(self), fields(status = ?self.status))]
    pub fn handle(&mut self, event: TransportEvent) -> Result<(), ConduitError> {
        match event {
            TransportEvent::Relay(event) => self.on_relay(event),
            TransportEvent::Incoming { conn, from, metadata } => {
                self.on_incoming(conn, &from, metadata.conduit_netid);
                Ok(())
            }
            TransportEvent::Connection { conn, event } => {
                self.on_connection(conn, event);
                Ok(())
            }
            TransportEvent::Host { host, event } => {
                self.on_host(host, event);
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(status = ?self.status))]
    pub fn on_timer(&mut self, timer: Timer) -> Result<(), ConduitError> {
        match timer {
            Timer::ReconnectRelay { generation } => {
                if generation != self.reconnect_generation || !self.reconnect_armed {
                    debug!("stale reconnect timer");
                } else if self.status == NetworkStatus::Offline {
                    self.transport.reconnect();
                    self.schedule(self.config.network_reconnect_delay(), timer);
                } else {
                    debug!("reconnect timer fired while not offline");
                    self.disarm_reconnect();
                }
            }
            Timer::DiscoveryTimeout { conduit, attempt } => self.on_discovery_timeout(conduit, attempt),
            Timer::DiscoveryTakeover { conduit } => self.on_discovery_takeover(conduit),
            Timer::DiscoveryReconnect { conduit } => self.on_discovery_reconnect(conduit),
        }
        Ok(())
    }

    fn on_relay(&mut self, event: RelayEvent) -> Result<(), ConduitError> {
        match event {
            RelayEvent::Open => {
                match self.status {
                    NetworkStatus::Offline => {
                        info!("network back online");
                        self.status = NetworkStatus::Online;
                        self.disarm_reconnect();
                        self.requeue_lost_links();
                    }
                    NetworkStatus::Uninitialized => {
                        debug!("ignored relay open after reset");
                        return Ok(());
                    }
                    _ => {
                        info!(netid = ?self.node_netid, "connected to relay");
                        self.status = NetworkStatus::Online;
                    }
                }
                self.drain_work_queue()
            }
            RelayEvent::Disconnected => {
                match self.status {
                    NetworkStatus::Offline => debug!("ignored repeated disconnect"),
                    NetworkStatus::Uninitialized => debug!("ignored disconnect after reset"),
                    _ => {
                        info!("disconnected from relay");
                        self.go_offline();
                    }
                }
                Ok(())
            }
            RelayEvent::Closed => {
                match self.status {
                    NetworkStatus::Online => {
                        warn!("relay closed the session");
                        self.reset(false);
                    }
                    status => debug!(?status, "ignored relay close"),
                }
                Ok(())
            }
            RelayEvent::Error(err) => self.on_relay_error(err),
        }
    }

    fn on_relay_error(&mut self, err: TransportError) -> Result<(), ConduitError> {
        match err.classify() {
            ErrorClass::PeerUnavailable => {
                let waiting = err.peer.as_ref().and_then(|peer| self.pending_discovery.remove(peer));
                match waiting {
                    Some(conduits) => {
                        for conduit in conduits {
                            self.discovery_failed(conduit);
                        }
                    }
                    None => debug!(%err, "peer unavailable outside discovery"),
                }
                Ok(())
            }
            ErrorClass::Recoverable => {
                match self.status {
                    NetworkStatus::Pending => {
                        info!(%err, "initial relay connect failed, starting offline");
                        self.go_offline();
                    }
                    NetworkStatus::Online => {
                        info!(%err, "lost relay, going offline");
                        self.go_offline();
                    }
                    status => debug!(?status, %err, "ignored network error"),
                }
                Ok(())
            }
            ErrorClass::Fatal => {
                warn!(%err, "unhandled relay error, resetting");
                self.reset(true);
                Err(ConduitError::Fatal(err))
            }
        }
    }

    fn go_offline(&mut self) {
        self.status = NetworkStatus::Offline;
        if !self.reconnect_armed {
            self.reconnect_armed = true;
            self.reconnect_generation += 1;
            let timer = Timer::ReconnectRelay {
                generation: self.reconnect_generation,
            };
            self.schedule(self.config.network_reconnect_delay(), timer);
        }
    }

    fn disarm_reconnect(&mut self) {
        if self.reconnect_armed {
            self.reconnect_armed = false;
            self.reconnect_generation += 1;
        }
    }

    /// Queues a connect for every open conduit that lost its discovery link
    /// or its dial while the relay was away.
    fn requeue_lost_links(&mut self) {
        let lost: Vec<ConduitId> = self
            .open
            .iter()
            .copied()
            .filter(|id| self.conduits.get(id).is_some_and(ConduitState::needs_connect))
            .collect();
        for id in lost {
            self.queue_connect(id);
        }
    }

    pub(crate) fn queue_connect(&mut self, id: ConduitId) {
        let item = WorkItem::Connect(id);
        if !self.work_queue.contains(&item) {
            self.work_queue.push_back(item);
        }
    }

    /// Runs work deferred while not online, once each, in FIFO order.
    fn drain_work_queue(&mut self) -> Result<(), ConduitError> {
        while let Some(item) = self.work_queue.pop_front() {
            match item {
                WorkItem::Connect(id) => self.connect(id)?,
            }
        }
        Ok(())
    }

    pub(crate) fn connect(&mut self, id: ConduitId) -> Result<(), ConduitError> {
        let Some(state) = self.conduits.get(&id) else {
            debug!(?id, "connect for released conduit");
            return Ok(());
        };
        if state.status == ConduitStatus::Closed {
            return Ok(());
        }
        match state.netid.kind() {
            NetIdKind::Group => self.connect_discovery(id),
            NetIdKind::Node => {
                let netid = state.netid.clone();
                self.dial_peer(id, netid, false);
            }
        }
        Ok(())
    }

    /// Closes every conduit and returns to uninitialized.
    ///
    /// With `preserve_id`, the next [`init`](Self::init) reuses this node's
    /// netid.
    #[instrument(skip(self))]
    pub fn reset(&mut self, preserve_id: bool) {
        self.disarm_reconnect();

        let open: Vec<ConduitId> = self.open.iter().copied().collect();
        for id in open {
            self.close_conduit(id);
        }
        self.open.clear();
        self.work_queue.clear();
        for pending in std::mem::take(&mut self.listen_queue) {
            self.transport.close(pending.conn);
        }
        self.pending_discovery.clear();
        self.routes.clear();
        self.hosts.clear();

        if self.status != NetworkStatus::Uninitialized {
            self.transport.destroy();
        }
        self.status = NetworkStatus::Uninitialized;
        if !preserve_id {
            self.node_netid = None;
        }
    }

    fn on_incoming(&mut self, conn: ConnectionId, from: &PeerAddress, target: Option<NetId>) {
        let from = match from.to_netid(&self.isolation) {
            Ok(netid) => netid,
            Err(err) => {
                warn!(%err, "rejected incoming connection");
                self.transport.close(conn);
                return;
            }
        };
        let Some(target) = target else {
            debug!(%from, "incoming connection without conduit netid");
            self.transport.close(conn);
            return;
        };

        if self.node_netid.as_ref() == Some(&target) {
            match self.find_open_conduit(&target, true) {
                Some(listener) => self.attach_peer(listener, conn, from, false),
                None => {
                    debug!(%from, "queued incoming connection until listen");
                    self.routes.insert(conn, Route::Queued);
                    self.listen_queue.push(PendingIncoming {
                        conn,
                        from,
                        conduit_netid: target,
                        open: false,
                    });
                }
            }
            return;
        }

        match self.find_open_conduit(&target, false) {
            Some(id) => self.attach_peer(id, conn, from, false),
            None => {
                debug!(%from, %target, "no conduit for incoming connection");
                self.transport.close(conn);
            }
        }
    }

    fn find_open_conduit(&self, netid: &NetId, listener: bool) -> Option<ConduitId> {
        self.open.iter().copied().find(|id| {
            self.conduits
                .get(id)
                .is_some_and(|c| &c.netid == netid && c.listener == listener)
        })
    }

    fn on_connection(&mut self, conn: ConnectionId, event: ConnectionEvent) {
        let Some(route) = self.routes.get(&conn).cloned() else {
            debug!(?conn, ?event, "event for unrouted connection");
            return;
        };
        match route {
            Route::Peer { conduit, netid } => self.on_peer_event(conduit, conn, netid, event),
            Route::Discovery { conduit } => self.on_discovery_event(conduit, conn, event),
            Route::HostClient { conduit, netid } => self.on_host_client_event(conduit, conn, netid, event),
            Route::Queued => self.on_queued_event(conn, event),
        }
    }

    fn on_queued_event(&mut self, conn: ConnectionId, event: ConnectionEvent) {
        let Some(index) = self.listen_queue.iter().position(|p| p.conn == conn) else {
            return;
        };
        match event {
            ConnectionEvent::Open => self.listen_queue[index].open = true,
            ConnectionEvent::Data(_) => debug!(?conn, "dropped data before listen"),
            ConnectionEvent::Closed | ConnectionEvent::Error(_) => {
                self.listen_queue.remove(index);
                self.routes.remove(&conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectMetadata, TransportErrorKind};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        OpenPeer(PeerAddress),
        Reconnect,
        Destroy,
        Connect(PeerAddress),
        Close(ConnectionId),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        next: u64,
    }

    impl Transport for Recorder {
        fn open_peer(&mut self, address: &PeerAddress) {
            self.calls.push(Call::OpenPeer(address.clone()));
        }
        fn reconnect(&mut self) {
            self.calls.push(Call::Reconnect);
        }
        fn destroy(&mut self) {
            self.calls.push(Call::Destroy);
        }
        fn connect(&mut self, to: &PeerAddress, _: ConnectMetadata) -> ConnectionId {
            self.calls.push(Call::Connect(to.clone()));
            self.next += 1;
            ConnectionId(self.next)
        }
        fn send(&mut self, _: ConnectionId, _: Vec<u8>) {}
        fn close(&mut self, conn: ConnectionId) {
            self.calls.push(Call::Close(conn));
        }
        fn open_host(&mut self, _: &PeerAddress) -> HostId {
            HostId(0)
        }
        fn destroy_host(&mut self, _: HostId) {}
    }

    fn session() -> Session<Recorder> {
        let config = SessionConfig {
            rng_seed: Some(1),
            ..SessionConfig::default()
        };
        Session::new(config, Recorder::default(), IsolationToken::new("test"))
    }

    fn network_error() -> TransportEvent {
        TransportEvent::Relay(RelayEvent::Error(TransportError::new(
            TransportErrorKind::Network,
            "offline",
        )))
    }

    #[test]
    fn init_is_idempotent() {
        let mut s = session();
        let first = s.init(None).unwrap();
        let second = s.init(Some(NetId::node("other"))).unwrap();
        assert_eq!(first, second);
        assert_eq!(s.status(), NetworkStatus::Pending);
        assert_eq!(s.transport.calls.len(), 1);
    }

    #[test]
    fn init_rejects_group_netid() {
        let mut s = session();
        let err = s.init(Some(NetId::group("lobby"))).unwrap_err();
        assert!(matches!(err, ConduitError::IllegalNetId(_)));
        assert_eq!(s.status(), NetworkStatus::Uninitialized);
    }

    #[test]
    fn preserved_id_survives_reset() {
        let mut s = session();
        let netid = s.init(Some(NetId::node("keep"))).unwrap();
        s.reset(true);
        assert_eq!(s.status(), NetworkStatus::Uninitialized);
        assert_eq!(s.init(None).unwrap(), netid);

        s.reset(false);
        assert!(s.node_netid().is_none());
        assert_ne!(s.init(None).unwrap(), netid);
    }

    #[test]
    fn status_transitions() {
        let mut s = session();
        s.init(None).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        assert_eq!(s.status(), NetworkStatus::Online);

        s.handle(TransportEvent::Relay(RelayEvent::Disconnected)).unwrap();
        assert_eq!(s.status(), NetworkStatus::Offline);
        assert_eq!(s.take_timers().len(), 1);

        s.handle(TransportEvent::Relay(RelayEvent::Disconnected)).unwrap();
        s.handle(network_error()).unwrap();
        assert!(s.take_timers().is_empty(), "reconnect timer armed once");

        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        assert_eq!(s.status(), NetworkStatus::Online);
    }

    #[test]
    fn pending_network_error_starts_offline() {
        let mut s = session();
        s.init(None).unwrap();
        s.handle(network_error()).unwrap();
        assert_eq!(s.status(), NetworkStatus::Offline);
    }

    #[test]
    fn reconnect_timer_repeats_while_offline() {
        let mut s = session();
        s.init(None).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Disconnected)).unwrap();

        let (delay, timer) = s.take_timers()[0];
        assert_eq!(delay, Duration::from_millis(250));
        s.on_timer(timer).unwrap();
        assert_eq!(s.transport.calls.last(), Some(&Call::Reconnect));
        assert_eq!(s.take_timers(), vec![(delay, timer)]);

        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        let calls = s.transport.calls.len();
        s.on_timer(timer).unwrap();
        assert_eq!(s.transport.calls.len(), calls, "disarmed timer is stale");
        assert!(s.take_timers().is_empty());
    }

    #[test]
    fn close_is_ignored_unless_online() {
        let mut s = session();
        s.init(None).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Closed)).unwrap();
        assert_eq!(s.status(), NetworkStatus::Pending);

        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Closed)).unwrap();
        assert_eq!(s.status(), NetworkStatus::Uninitialized);
        assert!(s.node_netid().is_none());
        assert!(s.transport.calls.contains(&Call::Destroy));
    }

    #[test]
    fn fatal_error_resets_and_reports() {
        let mut s = session();
        let netid = s.init(None).unwrap();
        let err = TransportError::new(TransportErrorKind::UnavailableId, "taken");
        let result = s.handle(TransportEvent::Relay(RelayEvent::Error(err)));

        assert!(matches!(result, Err(ConduitError::Fatal(_))));
        assert_eq!(s.status(), NetworkStatus::Uninitialized);
        assert_eq!(s.node_netid(), Some(&netid));
    }

    #[test]
    fn unavailable_rendezvous_fails_every_waiting_conduit() {
        let mut s = session();
        s.init(None).unwrap();
        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        let first = s.make_conduit(NetId::group("lobby")).unwrap();
        let second = s.make_conduit(NetId::group("lobby")).unwrap();
        s.take_timers();

        let rendezvous = PeerAddress::new(&NetId::group("lobby"), &s.isolation);
        let err = TransportError::new(TransportErrorKind::PeerUnavailable, "nobody home").with_peer(rendezvous);
        s.handle(TransportEvent::Relay(RelayEvent::Error(err))).unwrap();

        let takeovers: Vec<ConduitId> = s
            .take_timers()
            .into_iter()
            .filter_map(|(_, timer)| match timer {
                Timer::DiscoveryTakeover { conduit } => Some(conduit),
                _ => None,
            })
            .collect();
        assert_eq!(takeovers, [first, second]);
        assert!(s.pending_discovery.is_empty());
    }

    #[test]
    fn queued_connects_replay_in_order() {
        let mut s = session();
        let a = s.make_conduit(NetId::group("a")).unwrap();
        let b = s.make_conduit(NetId::node("b")).unwrap();
        assert_eq!(s.transport.calls.len(), 1, "only open_peer before online");

        s.handle(TransportEvent::Relay(RelayEvent::Open)).unwrap();
        let dialed: Vec<_> = s.transport.calls[1..]
            .iter()
            .filter_map(|c| match c {
                Call::Connect(to) => Some(to.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            dialed,
            vec![
                PeerAddress::new(&NetId::group("a"), &s.isolation),
                PeerAddress::new(&NetId::node("b"), &s.isolation),
            ]
        );
        assert!(s.work_queue.is_empty());
        assert_eq!(s.conduit_status(a).unwrap(), ConduitStatus::Pending);
        assert_eq!(s.conduit_status(b).unwrap(), ConduitStatus::Pending);
    }

    #[test]
    fn foreign_incoming_is_closed() {
        let mut s = session();
        s.init(None).unwrap();
        let from = PeerAddress::new(&NetId::node("x"), &IsolationToken::new("elsewhere"));
        s.handle(TransportEvent::Incoming {
            conn: ConnectionId(40),
            from,
            metadata: ConnectMetadata {
                conduit_netid: s.node_netid().cloned(),
            },
        })
        .unwrap();
        assert_eq!(s.transport.calls.last(), Some(&Call::Close(ConnectionId(40))));
        assert!(s.listen_queue.is_empty());
    }
}
