//! Port Command Protocol (PCP): the topic/address and status-payload
//! convention used to command and report on transfer ports over the
//! message bus.

pub mod domain;
pub mod error;
pub mod status;
pub mod topic;

pub use domain::{ClientIdentity, PcpDirection, PcpMode, PortId, TransferState};
pub use error::PcpError;
pub use status::PcpStatus;
pub use topic::{command_topic, status_topic};
