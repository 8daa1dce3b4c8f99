use blueprint_bridge::bridge::codec::{self, Envelope, MessageKind, METHOD_NOT_FOUND};
use blueprint_bridge::bridge::connection::ConnectionState;
use blueprint_bridge::bridge::host::{Host, PropertyValue};
use blueprint_bridge::bridge::transport::{Frame, MemoryConnector, MemoryPeer};
use blueprint_bridge::bridge::{BridgeClient, BridgeConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn connected_client() -> (BridgeClient, MemoryPeer, MemoryConnector) {
    let connector = MemoryConnector::new();
    let peer = connector.push_link();
    let mut config = BridgeConfig::default();
    config.auto_connect = true;

    let client = BridgeClient::start(config, Arc::new(connector.clone()), Host::new())
        .await
        .unwrap();
    client
        .connection()
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    (client, peer, connector)
}

#[tokio::test]
async fn remote_commands_mutate_the_host() {
    let (client, mut peer, _connector) = connected_client().await;

    peer.send_envelope(&Envelope::request(
        "1",
        "create_blueprint",
        json!({"blueprint_name": "Hero", "parent_class": "Character", "asset_path": "/Game/Blueprints/"}),
    ));
    let created = peer.next_envelope().await.unwrap();
    assert_eq!(created.kind, MessageKind::Response);
    assert_eq!(created.id.as_deref(), Some("1"));
    assert_eq!(created.result.unwrap()["blueprint_path"], json!("/Game/Blueprints/Hero"));

    peer.send_envelope(&Envelope::request(
        "2",
        "set_blueprint_property",
        json!({
            "blueprint_path": "/Game/Blueprints/Hero",
            "property_name": "health",
            "property_value": "250",
            "property_type": "int"
        }),
    ));
    let set = peer.next_envelope().await.unwrap();
    assert_eq!(set.id.as_deref(), Some("2"));
    assert_eq!(set.result.unwrap()["success"], json!(true));

    let (health, worker) = client
        .with_host(|host| {
            let health = host
                .assets
                .get("/Game/Blueprints/Hero")
                .and_then(|asset| asset.defaults.get("Health").cloned());
            (health, std::thread::current().name().map(str::to_string))
        })
        .await
        .unwrap();
    assert_eq!(health, Some(PropertyValue::Int(250)));
    assert_eq!(worker.as_deref(), Some("host-mutation"));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_methods_and_notifications() {
    let (client, mut peer, _connector) = connected_client().await;

    // A notification is executed but never answered.
    peer.send_envelope(&Envelope::notification(
        "create_blueprint",
        json!({"blueprint_name": "Silent", "parent_class": "Actor"}),
    ));
    peer.send_envelope(&Envelope::request("7", "launch_rockets", json!({})));

    let reply = peer.next_envelope().await.unwrap();
    assert_eq!(reply.id.as_deref(), Some("7"));
    assert_eq!(reply.error.unwrap()["code"], json!(METHOD_NOT_FOUND));

    let exists = client
        .with_host(|host| host.assets.contains("/Game/Blueprints/Silent"))
        .await
        .unwrap();
    assert!(exists);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_frames_do_not_disturb_the_link() {
    let (client, mut peer, _connector) = connected_client().await;

    peer.send_text("][");
    peer.send_text(r#"{"jsonrpc":"1.0","id":"x","method":"get_server_status"}"#);
    peer.send_text(r#"{"jsonrpc":"2.0","id":"x"}"#);
    peer.send_envelope(&Envelope::request("status", "get_server_status", json!("")));

    let reply = peer.next_envelope().await.unwrap();
    assert_eq!(reply.id.as_deref(), Some("status"));
    let result = reply.result.unwrap();
    assert_eq!(result["online"], json!(true));
    assert_eq!(result["protocol_version"], json!(blueprint_bridge::PROTOCOL_VERSION));
    assert!(client.connection().is_connected());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn outbound_requests_round_trip() {
    let (client, mut peer, _connector) = connected_client().await;

    let pending = client
        .send_request("tools/list", json!({"cursor": null}))
        .await
        .unwrap();
    let sent = peer.next_envelope().await.unwrap();
    assert_eq!(sent.kind, MessageKind::Request);
    assert_eq!(sent.method.as_deref(), Some("tools/list"));

    peer.send_envelope(&Envelope::response(sent.id.unwrap(), json!({"tools": []})));
    assert_eq!(pending.wait().await, Ok(json!({"tools": []})));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_ends_the_session_gracefully() {
    let (client, mut peer, _connector) = connected_client().await;
    client.shutdown().await.unwrap();

    let end = peer.next_envelope().await.unwrap();
    assert_eq!(end.method.as_deref(), Some("session/end"));
    assert!(peer.next_envelope().await.is_none());
}

#[tokio::test]
async fn invalid_config_is_refused_at_start() {
    let mut config = BridgeConfig::default();
    config.endpoint_path = "relative".into();
    let result = BridgeClient::start(config, Arc::new(MemoryConnector::new()), Host::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn dropping_the_client_closes_the_link() {
    let (client, mut peer, _connector) = connected_client().await;
    drop(client);

    let end = tokio::time::timeout(Duration::from_secs(2), peer.next_envelope())
        .await
        .expect("link closes once the client is gone");
    assert_eq!(end.unwrap().method.as_deref(), Some("session/end"));
    assert_eq!(peer.next_frame().await, Some(Frame::Close));
    assert_eq!(peer.next_frame().await, None);
}

#[tokio::test]
async fn numeric_request_ids_are_echoed_as_numbers() {
    let (client, mut peer, _connector) = connected_client().await;

    peer.send_text(r#"{"jsonrpc":"2.0","id":42,"method":"get_server_status"}"#);
    let reply = peer.next_envelope().await.unwrap();
    assert!(reply.numeric_id);
    assert_eq!(codec::to_value(&reply)["id"], json!(42));

    client.shutdown().await.unwrap();
}
