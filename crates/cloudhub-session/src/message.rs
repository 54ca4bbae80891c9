//! Outbound edge messages and their correlation ids.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Per-session correlation id. Assigned monotonically by the message pool;
/// the edge node acknowledges a message by echoing its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(MessageId)
    }
}

/// A message queued for delivery to one edge node.
#[derive(Debug, Clone)]
pub struct EdgeMessage {
    pub id: MessageId,
    /// Resource path the edge side routes on, e.g. `"node/pods/update"`.
    pub route: String,
    pub payload: Bytes,
}
