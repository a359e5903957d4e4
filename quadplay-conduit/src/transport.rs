//! The seam between the session state machine and a relay-brokered
//! peer-to-peer transport.
//!
//! Commands never fail synchronously. Every outcome, including errors,
//! comes back as a [`TransportEvent`].

use crate::netid::{NetId, PeerAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

/// Metadata attached to an outgoing dial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectMetadata {
    /// Conduit the dialer wants to join on the remote side. Empty for
    /// discovery dials.
    pub conduit_netid: Option<NetId>,
}

pub trait Transport {
    /// Registers this session with the relay under `address`.
    fn open_peer(&mut self, address: &PeerAddress);

    /// Asks the relay peer to reconnect after a disconnect.
    fn reconnect(&mut self);

    /// Tears down the relay peer and every connection it owns.
    fn destroy(&mut self);

    fn connect(&mut self, to: &PeerAddress, metadata: ConnectMetadata) -> ConnectionId;

    fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>);

    fn close(&mut self, conn: ConnectionId);

    /// Binds a second relay identity used to host a discovery rendezvous.
    fn open_host(&mut self, address: &PeerAddress) -> HostId;

    fn destroy_host(&mut self, host: HostId);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Relay(RelayEvent),
    /// A remote peer dialed this session's own address.
    Incoming {
        conn: ConnectionId,
        from: PeerAddress,
        metadata: ConnectMetadata,
    },
    Connection {
        conn: ConnectionId,
        event: ConnectionEvent,
    },
    Host {
        host: HostId,
        event: HostEvent,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Open,
    /// Lost the relay; recoverable through [`Transport::reconnect`].
    Disconnected,
    /// The relay peer is gone for good.
    Closed,
    Error(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Data(Vec<u8>),
    Closed,
    Error(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Open,
    Error(TransportError),
    /// A discovery client dialed the hosted rendezvous address.
    Incoming { conn: ConnectionId, from: PeerAddress },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The dialed address is not registered with the relay.
    PeerUnavailable,
    Network,
    Incompatible,
    /// The address asked for is already taken.
    UnavailableId,
    Other,
}

/// How the session reacts to a relay-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected during discovery; routed to the conduit that dialed.
    PeerUnavailable,
    /// Go offline and retry.
    Recoverable,
    /// Reset the session and report to the caller.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// Address the failed operation targeted, when there was one.
    pub peer: Option<PeerAddress>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        TransportError {
            kind,
            peer: None,
            message: message.into(),
        }
    }

    pub fn with_peer(mut self, peer: PeerAddress) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn classify(&self) -> ErrorClass {
        match self.kind {
            TransportErrorKind::PeerUnavailable => ErrorClass::PeerUnavailable,
            TransportErrorKind::Network | TransportErrorKind::Incompatible => ErrorClass::Recoverable,
            TransportErrorKind::UnavailableId | TransportErrorKind::Other => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let class = |kind| TransportError::new(kind, "x").classify();
        assert_eq!(class(TransportErrorKind::PeerUnavailable), ErrorClass::PeerUnavailable);
        assert_eq!(class(TransportErrorKind::Network), ErrorClass::Recoverable);
        assert_eq!(class(TransportErrorKind::Incompatible), ErrorClass::Recoverable);
        assert_eq!(class(TransportErrorKind::UnavailableId), ErrorClass::Fatal);
        assert_eq!(class(TransportErrorKind::Other), ErrorClass::Fatal);
    }

    #[test]
    fn display_names_kind() {
        let err = TransportError::new(TransportErrorKind::Network, "socket reset")
            .with_peer(PeerAddress::from_raw("pabc"));
        assert_eq!(err.to_string(), "Network: socket reset");
        assert_eq!(err.peer, Some(PeerAddress::from_raw("pabc")));
    }
}
