use thiserror::Error;

/// Errors raised while building the codec or encoding a packet.
///
/// Decoding never fails with an error: anything that cannot be decoded is
/// simply not a packet.
#[derive(Debug, Error)]
pub enum PacketError {
    /// A packet kind declares a header that is not exactly two bytes.
    #[error("packet kind {name} has an invalid header length {len}")]
    InvalidHeaderLength { name: &'static str, len: usize },

    /// Two packet kinds share the same header.
    #[error("packet kind {name} has the same header as {other}")]
    DuplicateHeader {
        name: &'static str,
        other: &'static str,
    },

    /// The peer list of a find-node response could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
