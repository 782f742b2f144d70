use super::node::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet error: {0}")]
    Packet(#[from] crate::packet::PacketError),

    #[error("local discovery error: {0}")]
    Discovery(#[from] crate::lsd::LsdError),

    #[error("invalid node id")]
    InvalidNodeId,

    /// No matching reply arrived from `peer` within the call's timeout.
    #[error("timeout: id:{peer}")]
    Timeout { peer: NodeId },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),

    #[error("rpc server stopped")]
    Stopped,
}
