//! cloudhub-core — configuration and replica identity.
//! All other cloudhub crates depend on this one.

pub mod config;
pub mod identity;

pub use config::{ConfigError, HubConfig, HubSettings, IdentityConfig, SessionSettings};
pub use identity::{CloudInfo, IdType, Identity, IdentityError};
