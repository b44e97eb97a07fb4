use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PcpError;

/// Identifier of a transfer port ("s1", "s2"). Whether a port acts as
/// source or destination is decided per run, not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(String);

impl PortId {
    pub fn new(id: impl Into<String>) -> Result<Self, PcpError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PcpError::EmptyPortId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical consumer identity a status update is addressed to. Doubles as
/// the namespace segment of command topics. Closed set by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientIdentity {
    #[default]
    Xms,
    Aas,
}

impl ClientIdentity {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientIdentity::Xms => "xms",
            ClientIdentity::Aas => "aas",
        }
    }

    /// The other identity of the two-element set; the UI toggle surface
    /// flips between them.
    pub fn toggled(self) -> Self {
        match self {
            ClientIdentity::Xms => ClientIdentity::Aas,
            ClientIdentity::Aas => ClientIdentity::Xms,
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loading/unloading stage reported in a status record. Wire names keep
/// the single-letter source encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    #[serde(rename = "L")]
    Loading,
    #[serde(rename = "U")]
    Unloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PcpMode {
    #[default]
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PcpDirection {
    A,
    #[default]
    B,
}
