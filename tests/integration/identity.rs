use crate::*;

use cloudhub_core::{CloudInfo, HubConfig, IdType};

fn config_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("cloudhub-it-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_configured_identity_from_file() {
    let dir = config_dir("configured");
    let path = write_config(
        &dir,
        r#"
[identity]
id_type = "configured"
id = "replica-east-1"

[hub]
node_limit = 2
"#,
    );
    let config = HubConfig::from_file(&path).unwrap();
    let identity = Identity::generate(&config.identity, &config.hub).unwrap();

    assert_eq!(identity.id_type(), IdType::Configured);
    assert_eq!(identity.id(), "replica-east-1");
    assert_eq!(config.hub.node_limit, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_empty_configured_id_falls_back_to_uuid() {
    let dir = config_dir("fallback");
    let path = write_config(
        &dir,
        r#"
[identity]
id_type = "configured"
id = ""
"#,
    );
    let config = HubConfig::from_file(&path).unwrap();
    let identity = Identity::generate(&config.identity, &config.hub).unwrap();

    assert_eq!(identity.id_type(), IdType::Uuid);
    assert_eq!(identity.id().len(), 36);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_node_id_file_overrides_configured_id() {
    let dir = config_dir("nodeid");
    let id_path = dir.join("node_id");
    std::fs::write(&id_path, "replica-from-file\n").unwrap();
    let path = write_config(
        &dir,
        &format!(
            "[identity]\nid_type = \"configured\"\nid = \"ignored\"\nnode_id_file = {:?}\n",
            id_path.display().to_string()
        ),
    );

    let mut config = HubConfig::from_file(&path).unwrap();
    let read = config.resolve_node_id_from(&dir.join("absent")).unwrap();
    assert_eq!(read.as_deref(), Some("replica-from-file"));

    let identity = Identity::generate(&config.identity, &config.hub).unwrap();
    assert_eq!(identity.id_type(), IdType::Configured);
    assert_eq!(identity.id(), "replica-from-file");

    let _ = std::fs::remove_dir_all(&dir);
}

/// Two replicas behind different listen addresses hash to different ids;
/// the same replica restarted hashes to the same id.
#[test]
fn test_hash_identity_is_stable_per_replica() {
    let east = CloudInfo::new("02:42:ac:11:00:02", "10.0.0.1:10002", "10.0.0.1:10000");
    let west = CloudInfo::new("02:42:ac:11:00:02", "10.0.0.2:10002", "10.0.0.2:10000");

    let east_id = Identity::from_cloud_info(east.clone()).unwrap();
    let restarted = Identity::from_cloud_info(east).unwrap();
    let west_id = Identity::from_cloud_info(west).unwrap();

    assert_eq!(east_id.id(), restarted.id());
    assert_ne!(east_id.id(), west_id.id());
    assert_eq!(east_id.id().len(), 64);
}

/// Each replica answers "is this node mine" from its own identity.
#[tokio::test]
async fn test_replicas_disagree_on_ownership() {
    let east = Arc::new(Identity::configured("east").unwrap());
    let west = Arc::new(Identity::configured("west").unwrap());
    let east_hub = Arc::new(SessionManager::new(east, 10));
    let west_hub = Arc::new(SessionManager::new(west, 10));

    let (edge, _inbox) = EdgeEnd::new();
    let session = ChannelSession::new("edge-1", "east", edge, options());
    east_hub.add_session(session.clone());
    west_hub.add_session(session);

    assert_eq!(east_hub.is_node_connect_self("edge-1"), ("east".to_string(), true));
    assert_eq!(west_hub.is_node_connect_self("edge-1"), ("east".to_string(), false));
}
