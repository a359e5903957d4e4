use quadplay_format::GraphError;

use crate::conduit::ConduitId;
use crate::transport::TransportError;

/// Error type for session and conduit operations.
#[derive(Debug, thiserror::Error)]
pub enum ConduitError {
    #[error("illegal netid {0:?}")]
    IllegalNetId(String),
    /// A peer address minted under a different isolation token.
    #[error("peer address {0} belongs to another application")]
    ForeignPeer(String),
    #[error("unknown conduit {0:?}")]
    UnknownConduit(ConduitId),
    /// The transport failed in a way the session cannot recover from. The
    /// session has already been reset when this is returned.
    #[error("fatal transport error: {0}")]
    Fatal(#[from] TransportError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] GraphError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}
