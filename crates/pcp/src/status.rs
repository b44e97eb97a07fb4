use serde::{Deserialize, Serialize};

use crate::{
    domain::{PcpDirection, PcpMode, PortId, TransferState},
    error::PcpError,
};

/// Wire status record published on a port's status topic.
///
/// The `port_id` field must match the port segment of the topic the record
/// is published on; the publisher guarantees this by deriving both from the
/// same [`PortId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcpStatus {
    pub port_id: String,
    pub code1: i32,
    pub code2: i32,
    pub mode: PcpMode,
    pub direction: PcpDirection,
    #[serde(default)]
    pub payload: Vec<serde_json::Value>,
    pub state: TransferState,
    pub flag: bool,
}

impl PcpStatus {
    /// Status record for `port` in `state`, every other field at its
    /// placeholder default.
    pub fn for_port(port: &PortId, state: TransferState) -> Self {
        Self {
            port_id: port.as_str().to_string(),
            code1: 0,
            code2: 0,
            mode: PcpMode::default(),
            direction: PcpDirection::default(),
            payload: Vec::new(),
            state,
            flag: false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PcpError> {
        serde_json::to_vec(self).map_err(PcpError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PcpError> {
        serde_json::from_slice(bytes).map_err(PcpError::Decode)
    }
}
