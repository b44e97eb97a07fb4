use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcpError {
    #[error("port id must not be empty")]
    EmptyPortId,
    #[error("failed to encode status payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode status payload: {0}")]
    Decode(#[source] serde_json::Error),
}
