//! Topic naming: pure functions from (port, identity) to bus addresses.
//!
//! Grammar, `/`-delimited:
//! - command topic: `{namespace}/{portId}/cmd/all`
//! - status topic:  `{namespace}/{portId}/status/{consumerId}`

use crate::domain::{ClientIdentity, PortId};

/// Address that carries all commands for `port` under `namespace`.
pub fn command_topic(port: &PortId, namespace: ClientIdentity) -> String {
    format!("{}/{}/cmd/all", namespace.as_str(), port.as_str())
}

/// Address that carries status updates for `port` addressed to `consumer`.
/// The namespace segment stays the default namespace; the consumer selects
/// the trailing segment only.
pub fn status_topic(port: &PortId, consumer: ClientIdentity) -> String {
    format!(
        "{}/{}/status/{}",
        ClientIdentity::default().as_str(),
        port.as_str(),
        consumer.as_str()
    )
}
