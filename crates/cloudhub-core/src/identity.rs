//! Replica identity — which cloud hub replica is this process.
//!
//! Three ways to derive the id:
//!   1. Uuid       — time-based RFC 4122 v1 UUID, unique per process start
//!   2. Hash       — SHA-256 over {mac, https addr, websocket addr}, stable across restarts
//!   3. Configured — operator-supplied string
//!
//! The id is computed once at startup and never changes afterwards. Any
//! recoverable failure (empty configured id, hash serialization) falls back
//! to a UUID identity. Only an unavailable random source is fatal.
//!
//! Hash mode collides when two replicas share the same MAC and listen
//! addresses (e.g. identical containers behind one load balancer address).

use std::fmt;
use std::str::FromStr;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{HubSettings, IdentityConfig};

// ── IdType ────────────────────────────────────────────────────────────────────

/// How the replica identity is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    Uuid,
    Hash,
    Configured,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::Uuid => "uuid",
            IdType::Hash => "hash",
            IdType::Configured => "configured",
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" | "0" => Ok(IdType::Uuid),
            "hash" | "1" => Ok(IdType::Hash),
            "configured" | "2" => Ok(IdType::Configured),
            other => Err(IdentityError::InvalidConfiguration(format!(
                "unknown id type {other:?}"
            ))),
        }
    }
}

/// Numeric form used by older integer-valued configs.
impl TryFrom<u8> for IdType {
    type Error = IdentityError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(IdType::Uuid),
            1 => Ok(IdType::Hash),
            2 => Ok(IdType::Configured),
            other => Err(IdentityError::InvalidConfiguration(format!(
                "unknown id type {other}"
            ))),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid identity configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to hash cloud info: {0}")]
    HashFailed(#[from] serde_json::Error),
    #[error("identity generation failed: {0}")]
    GenerationFailed(String),
}

// ── CloudInfo ─────────────────────────────────────────────────────────────────

/// Network attributes hashed in `IdType::Hash` mode.
///
/// Field order is fixed by the struct definition, so the JSON encoding is
/// byte-for-byte deterministic for equal inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mac_addr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_addr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ws_addr: String,
}

impl CloudInfo {
    pub fn new(
        mac_addr: impl Into<String>,
        host_addr: impl Into<String>,
        ws_addr: impl Into<String>,
    ) -> Self {
        Self {
            mac_addr: mac_addr.into(),
            host_addr: host_addr.into(),
            ws_addr: ws_addr.into(),
        }
    }

    /// Snapshot the local MAC plus the hub's listen addresses.
    pub fn snapshot(hub: &HubSettings) -> Self {
        Self::new(
            local_mac_addr(),
            hub.https_address.clone(),
            hub.websocket_address.clone(),
        )
    }

    /// SHA-256 over the JSON encoding, hex encoded.
    pub fn digest(&self) -> Result<String, IdentityError> {
        let encoded = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// This replica's identity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id_type: IdType,
    /// Only present when `id_type == Hash`.
    cloud_info: Option<CloudInfo>,
    id: String,
}

impl Identity {
    /// Build the identity from configuration.
    ///
    /// The returned `id_type` is the mode actually used, which is `Uuid`
    /// whenever the requested mode could not produce an id.
    pub fn generate(config: &IdentityConfig, hub: &HubSettings) -> Result<Self, IdentityError> {
        let attempt = match config.id_type {
            IdType::Configured => Self::configured(&config.id),
            IdType::Hash => Self::from_cloud_info(CloudInfo::snapshot(hub)),
            IdType::Uuid => Self::uuid(),
        };

        match attempt {
            Ok(identity) if !identity.id.is_empty() => {
                tracing::info!(
                    id_type = %identity.id_type,
                    cloud_id = %identity.id,
                    "cloud identity ready"
                );
                Ok(identity)
            }
            Err(e @ IdentityError::GenerationFailed(_)) => Err(e),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty id".to_string(),
                };
                tracing::warn!(
                    requested = %config.id_type,
                    reason = %reason,
                    "falling back to uuid cloud identity"
                );
                let identity = Self::uuid()?;
                tracing::info!(id_type = %identity.id_type, cloud_id = %identity.id, "cloud identity ready");
                Ok(identity)
            }
        }
    }

    /// Operator-supplied id. Must be non-empty.
    pub fn configured(id: &str) -> Result<Self, IdentityError> {
        if id.is_empty() {
            return Err(IdentityError::InvalidConfiguration(
                "configured id is empty".to_string(),
            ));
        }
        Ok(Self {
            id_type: IdType::Configured,
            cloud_info: None,
            id: id.to_string(),
        })
    }

    /// Deterministic id from network attributes.
    pub fn from_cloud_info(info: CloudInfo) -> Result<Self, IdentityError> {
        let id = info.digest()?;
        Ok(Self {
            id_type: IdType::Hash,
            cloud_info: Some(info),
            id,
        })
    }

    /// Fresh time-based UUID.
    pub fn uuid() -> Result<Self, IdentityError> {
        let node = uuid_node_id()?;
        Ok(Self {
            id_type: IdType::Uuid,
            cloud_info: None,
            id: Uuid::now_v1(&node).to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn cloud_info(&self) -> Option<&CloudInfo> {
        self.cloud_info.as_ref()
    }

    /// Is `id` this replica?
    pub fn is_self(&self, id: &str) -> bool {
        self.id == id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.id_type)
    }
}

// ── Node id / MAC helpers ─────────────────────────────────────────────────────

/// Node bytes for a v1 UUID: the local MAC, or random bytes with the
/// multicast bit set (RFC 4122 §4.5) when no MAC is available.
fn uuid_node_id() -> Result<[u8; 6], IdentityError> {
    if let Some(mac) = parse_mac(&local_mac_addr()) {
        return Ok(mac);
    }
    let mut node = [0u8; 6];
    rand::rngs::OsRng
        .try_fill_bytes(&mut node)
        .map_err(|e| IdentityError::GenerationFailed(e.to_string()))?;
    node[0] |= 0x01;
    Ok(node)
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for byte in out.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One row of interface metadata.
#[derive(Debug, Clone)]
struct IfEntry {
    name: String,
    up: bool,
    loopback: bool,
    hw_addr: Option<[u8; 6]>,
}

/// Hardware address of the first interface that is up and not loopback.
/// Empty when none qualifies or enumeration fails.
pub fn local_mac_addr() -> String {
    let addrs = match getifaddrs() {
        Ok(a) => a,
        Err(e) => {
            tracing::debug!(error = %e, "interface enumeration failed");
            return String::new();
        }
    };
    let entries = addrs.map(|ifa| IfEntry {
        up: ifa.flags.contains(InterfaceFlags::IFF_UP),
        loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
        hw_addr: ifa
            .address
            .as_ref()
            .and_then(|a| a.as_link_addr())
            .and_then(|l| l.addr()),
        name: ifa.interface_name,
    });
    first_hardware_addr(entries)
}

/// getifaddrs yields one row per (interface, address family); the first
/// qualifying interface wins even if it has no hardware address.
fn first_hardware_addr(entries: impl IntoIterator<Item = IfEntry>) -> String {
    let entries: Vec<IfEntry> = entries.into_iter().collect();
    let Some(chosen) = entries.iter().find(|e| e.up && !e.loopback) else {
        return String::new();
    };
    entries
        .iter()
        .filter(|e| e.name == chosen.name)
        .find_map(|e| e.hw_addr)
        .map(|mac| format_mac(&mac))
        .unwrap_or_default()
}
