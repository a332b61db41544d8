/// Integration tests wiring a YAML config through to a running node.
use std::sync::Arc;

use serde_json::json;
use tether_config::{Config, LocationMode};
use tether_node::dispatch::{Capabilities, HostState};
use tether_node::protocol::handshake::ConnectParams;
use tether_node::protocol::{Frame, ResponseFrame};
use tether_node::transport::memory_transport;
use tether_node::{
    CommandDispatcher, DispatchPolicy, GatewayNode, IdentityStore, NodeOptions,
};

struct Foreground;

impl HostState for Foreground {
    fn is_foreground(&self) -> bool {
        true
    }
}

fn load_yaml(yaml: &str) -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.yaml");
    std::fs::write(&path, yaml).unwrap();
    tether_config::load(Some(&path)).unwrap()
}

#[test]
fn yaml_overrides_reach_node_options() {
    let config = load_yaml(
        r#"
gateway:
  url: ws://gateway.lan:18789
  reconnect:
    max_attempts: 3
client:
  id: kitchen-display
  display_name: Kitchen
  version: "2.1.0"
  platform: linux
node:
  camera_enabled: false
  location_mode: off
"#,
    );
    assert_eq!(config.node.location_mode, LocationMode::Off);

    let opts = NodeOptions::from_config(&config);
    assert_eq!(opts.url, "ws://gateway.lan:18789");
    assert_eq!(opts.client.id, "kitchen-display");
    assert_eq!(opts.client.display_name.as_deref(), Some("Kitchen"));
    assert_eq!(opts.user_agent, "tether/2.1.0 (linux)");
    assert_eq!(opts.reconnect.max_attempts, 3);
    assert_eq!(opts.role, "node");

    let policy = DispatchPolicy::from_config(&config.node);
    assert!(!policy.camera_enabled);
}

#[tokio::test]
async fn configured_node_completes_handshake() {
    let config = load_yaml("client:\n  id: bench-node\n  mode: node\n");
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::new(
        Capabilities::new(Arc::new(Foreground)),
        DispatchPolicy::from_config(&config.node),
    );
    let (connector, mut gateway) = memory_transport();
    let (node, handle) = GatewayNode::new(
        NodeOptions::from_config(&config),
        IdentityStore::new(dir.path()),
        Arc::new(connector),
        Arc::new(dispatcher),
    )
    .unwrap();
    tokio::spawn(node.run());

    handle.connect().await.unwrap();
    let mut peer = gateway.accept().await.unwrap();
    assert_eq!(peer.url(), "ws://127.0.0.1:18789");
    assert!(peer.send_event("connect.challenge", json!({"nonce": "n-42", "ts": 0}), None));

    let Some(Frame::Request(req)) = peer.next_frame().await else {
        panic!("expected connect request");
    };
    let params: ConnectParams = serde_json::from_value(req.params.unwrap()).unwrap();
    assert_eq!(params.client.id, "bench-node");
    assert_eq!(params.device.id, handle.device_id());
    assert_eq!(params.device.nonce, "n-42");
    assert!(params.commands.is_empty());

    peer.send_frame(&Frame::Response(ResponseFrame::success(
        req.id,
        json!({"type": "hello-ok", "protocol": 3, "policy": {"tickIntervalMs": 30000}}),
    )));
    handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    handle.shutdown().await.unwrap();
}

#[test]
fn identity_survives_reload_until_reset() {
    let dir = tempfile::tempdir().unwrap();
    let store = IdentityStore::new(dir.path());
    let first = store.load_or_create().unwrap();
    store
        .store_token(first.device_id(), "node", "tok", &[])
        .unwrap();

    let again = IdentityStore::new(dir.path()).load_or_create().unwrap();
    assert_eq!(first.device_id(), again.device_id());
    assert!(store.load_token(first.device_id(), "node").unwrap().is_some());

    let fresh = store.regenerate().unwrap();
    assert_ne!(fresh.device_id(), first.device_id());
    assert!(store.load_token(fresh.device_id(), "node").unwrap().is_none());
}
