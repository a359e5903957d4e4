//! Conduits: message channels between quadplay sessions over a
//! relay-brokered peer-to-peer network.
//!
//! A conduit either joins a *group* (many-to-many, found through an elected
//! rendezvous host) or dials a single *node* that is listening. Messages are
//! arbitrary value graphs, carried in the graph wire format of
//! `quadplay-format`.
//!
//! # Architecture
//!
//! - [`Session`] is a sans-IO state machine. It issues commands through the
//!   [`Transport`] trait and consumes [`TransportEvent`]s and [`Timer`]s.
//! - [`MemoryRelay`] is an in-process transport for tests and local play.
//! - [`SessionDriver`] runs a session on a tokio runtime.
//!
//! # Example
//!
//! ```
//! use quadplay_conduit::{IsolationToken, MemoryRelay, NetId, NetworkStatus, Session, SessionConfig, Timer};
//!
//! let relay = MemoryRelay::new();
//! let (transport, mut events) = relay.endpoint();
//! let mut session = Session::new(SessionConfig::default(), transport, IsolationToken::new("pong"));
//!
//! let lobby = session.make_conduit(NetId::group("lobby")).unwrap();
//! while let Ok(event) = events.try_recv() {
//!     session.handle(event).unwrap();
//! }
//! assert_eq!(session.status(), NetworkStatus::Online);
//!
//! // Nobody hosts the lobby yet, so the session will race to host it.
//! let timers = session.take_timers();
//! assert!(timers.iter().any(|(_, t)| *t == Timer::DiscoveryTakeover { conduit: lobby }));
//! ```

mod conduit;
mod config;
mod discovery;
mod driver;
mod error;
mod memory;
mod netid;
mod session;
mod transport;

pub use conduit::{ConduitEvent, ConduitId, ConduitStatus};
pub use config::SessionConfig;
pub use discovery::DiscoveryMessage;
pub use driver::SessionDriver;
pub use error::ConduitError;
pub use memory::{EndpointId, MemoryRelay, MemoryTransport};
pub use netid::{IsolationToken, NetId, NetIdKind, PeerAddress};
pub use session::{NetworkStatus, Session, Timer};
pub use transport::{
    ConnectMetadata, ConnectionEvent, ConnectionId, ErrorClass, HostEvent, HostId, RelayEvent, Transport,
    TransportError, TransportErrorKind, TransportEvent,
};
