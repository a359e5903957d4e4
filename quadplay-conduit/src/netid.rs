//! Logical conduit identities and the transport addresses derived from them.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::ConduitError;

const NODE_PREFIX: &str = "node_netid ";
const GROUP_PREFIX: &str = "group_netid ";

/// Bytes of the isolation digest appended to every address.
const DIGEST_LEN: usize = 12;

/// Identity of a node or a group.
///
/// Node netids name one session; group netids name a many-to-many
/// rendezvous. The kind is carried in the text prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetId(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetIdKind {
    Node,
    Group,
}

impl NetId {
    pub fn parse(text: &str) -> Result<Self, ConduitError> {
        if text.starts_with(NODE_PREFIX) || text.starts_with(GROUP_PREFIX) {
            Ok(NetId(text.to_string()))
        } else {
            Err(ConduitError::IllegalNetId(text.to_string()))
        }
    }

    /// A fresh node netid.
    pub fn random_node() -> Self {
        NetId(format!("{NODE_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn node(name: &str) -> Self {
        NetId(format!("{NODE_PREFIX}{name}"))
    }

    pub fn group(name: &str) -> Self {
        NetId(format!("{GROUP_PREFIX}{name}"))
    }

    pub fn kind(&self) -> NetIdKind {
        if self.0.starts_with(GROUP_PREFIX) {
            NetIdKind::Group
        } else {
            NetIdKind::Node
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NetId {
    type Error = ConduitError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        NetId::parse(&text)
    }
}

impl From<NetId> for String {
    fn from(netid: NetId) -> Self {
        netid.0
    }
}

/// Separates applications sharing one relay.
///
/// Every peer address is bound to a token, so two applications that pick the
/// same group name never meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationToken {
    digest: [u8; DIGEST_LEN],
}

impl IsolationToken {
    pub fn new(token: &str) -> Self {
        let hash = blake3::hash(token.as_bytes());
        let mut digest = [0; DIGEST_LEN];
        digest.copy_from_slice(&hash.as_bytes()[..DIGEST_LEN]);
        IsolationToken { digest }
    }
}

/// Transport-level address of a netid under an isolation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(netid: &NetId, isolation: &IsolationToken) -> Self {
        let mut bytes = netid.as_str().as_bytes().to_vec();
        bytes.extend_from_slice(&isolation.digest);
        PeerAddress(format!("p{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Wraps an address received from a transport.
    pub fn from_raw(address: impl Into<String>) -> Self {
        PeerAddress(address.into())
    }

    /// Recovers the netid, checking that the address was minted under
    /// `isolation`.
    pub fn to_netid(&self, isolation: &IsolationToken) -> Result<NetId, ConduitError> {
        let foreign = || ConduitError::ForeignPeer(self.0.clone());
        let encoded = self.0.strip_prefix('p').ok_or_else(foreign)?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| foreign())?;
        if bytes.len() < DIGEST_LEN {
            return Err(foreign());
        }
        let (netid, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if digest != isolation.digest {
            return Err(foreign());
        }
        let netid = String::from_utf8(netid.to_vec()).map_err(|_| foreign())?;
        NetId::parse(&netid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
