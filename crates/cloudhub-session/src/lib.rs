//! cloudhub-session — edge node sessions and the per-replica session table.

pub mod channel;
pub mod connection;
pub mod gauge;
pub mod manager;
pub mod message;
pub mod pool;
pub mod session;

pub use channel::{ChannelSession, EdgeLink, SessionOptions};
pub use connection::{ConnectionManager, NodeConnectionInfo};
pub use gauge::{AtomicGauge, ConnectedNodesGauge, LogGauge};
pub use manager::{SessionManager, SharedSessionManager};
pub use message::{EdgeMessage, MessageId};
pub use pool::NodeMessagePool;
pub use session::{NodeSession, SessionError, SharedSession, TerminateCode};
