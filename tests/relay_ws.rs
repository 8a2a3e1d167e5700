// End-to-end tests: real axum server on an ephemeral port, tungstenite clients.

use futures_util::{SinkExt, StreamExt};
use screencast_relay::config::RelayConfig;
use screencast_relay::metrics::ServerMetrics;
use screencast_relay::signaling::{Relay, SignalingServer};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn static_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("screencast-relay-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<h1>relay</h1>").unwrap();
    std::fs::write(dir.join("client.js"), "console.log('relay');").unwrap();
    std::fs::write(dir.join("style.css"), "body {}").unwrap();
    std::fs::write(dir.join("secret.txt"), "not for you").unwrap();
    dir
}

async fn start_server(config: RelayConfig) -> SocketAddr {
    start_relay(config).await.0
}

async fn start_relay(config: RelayConfig) -> (SocketAddr, Arc<Relay>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let metrics = ServerMetrics::new();
    let relay = Arc::new(Relay::new(metrics.clone()));
    let server = SignalingServer::new(relay.clone(), config, metrics);
    tokio::spawn(server.serve_on(listener));
    (addr, relay)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, message: Value) {
    ws.send(Message::Text(message.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Waits for the server to close the socket, skipping any close frame.
async fn expect_closed(ws: &mut Ws) {
    loop {
        match timeout(RECV_TIMEOUT, ws.next()).await.expect("timed out waiting for close") {
            None | Some(Err(_)) => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Ok(other)) => panic!("unexpected frame after shutdown: {other:?}"),
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str, auth: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let auth_header = auth.map(|t| format!("Authorization: Bearer {t}\r\n")).unwrap_or_default();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n{auth_header}Connection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let status = response.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, response)
}

#[tokio::test]
async fn test_broadcast_session_end_to_end() {
    let addr = start_server(RelayConfig {
        static_dir: static_dir(),
        ..RelayConfig::default()
    })
    .await;

    let mut broadcaster = connect(addr).await;
    send(&mut broadcaster, json!({"type": "create-room"})).await;
    let created = recv(&mut broadcaster).await;
    assert_eq!(created["type"], "room-created");
    let code = created["roomCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    let mut a = connect(addr).await;
    send(&mut a, json!({"type": "join-room", "roomId": code})).await;
    let joined = recv(&mut a).await;
    assert_eq!(joined["type"], "joined-room");
    assert_eq!(joined["roomId"], code.as_str());
    let a_id = joined["viewerId"].as_str().unwrap().to_string();
    assert_eq!(recv(&mut broadcaster).await, json!({"type": "viewer-connect", "id": a_id}));

    let mut b = connect(addr).await;
    send(&mut b, json!({"type": "join-room", "roomId": code})).await;
    let b_id = recv(&mut b).await["viewerId"].as_str().unwrap().to_string();
    assert_ne!(a_id, b_id);
    assert_eq!(recv(&mut broadcaster).await, json!({"type": "viewer-connect", "id": b_id}));

    // Offer addressed to B reaches B; A's next frame proves it never saw it
    let offer = json!({"type": "offer", "to": b_id, "from": "broadcaster", "sdp": {"type": "offer", "sdp": "v=0"}});
    send(&mut broadcaster, offer.clone()).await;
    assert_eq!(recv(&mut b).await, offer);

    let answer = json!({"type": "answer", "from": b_id, "sdp": {"type": "answer", "sdp": "v=0"}});
    send(&mut b, answer.clone()).await;
    assert_eq!(recv(&mut broadcaster).await, answer);

    b.close(None).await.unwrap();
    assert_eq!(recv(&mut broadcaster).await, json!({"type": "viewer-disconnect", "id": b_id}));

    broadcaster.close(None).await.unwrap();
    assert_eq!(recv(&mut a).await, json!({"type": "room-closed"}));

    let mut late = connect(addr).await;
    send(&mut late, json!({"type": "join-room", "roomId": code})).await;
    assert_eq!(recv(&mut late).await, json!({"type": "error", "message": "Room not found"}));
}

#[tokio::test]
async fn test_bad_input_keeps_connection_open() {
    let addr = start_server(RelayConfig {
        static_dir: static_dir(),
        ..RelayConfig::default()
    })
    .await;

    let mut client = connect(addr).await;
    client.send(Message::Text("garbage".into())).await.unwrap();
    send(&mut client, json!({"type": "offer", "to": "nobody", "sdp": {}})).await;
    send(&mut client, json!({"type": "join-room", "roomId": "000000"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "error", "message": "Room not found"}));

    send(&mut client, json!({"type": "create-room"})).await;
    assert_eq!(recv(&mut client).await["type"], "room-created");
}

#[tokio::test]
async fn test_static_allow_list() {
    let addr = start_server(RelayConfig {
        static_dir: static_dir(),
        ..RelayConfig::default()
    })
    .await;

    let (status, body) = http_get(addr, "/", None).await;
    assert_eq!(status, 200);
    assert!(body.contains("<h1>relay</h1>"));
    assert_eq!(http_get(addr, "/client.js", None).await.0, 200);
    assert_eq!(http_get(addr, "/style.css", None).await.0, 200);

    assert_eq!(http_get(addr, "/secret.txt", None).await.0, 404);
    assert_eq!(http_get(addr, "/index.html", None).await.0, 404);
    assert_eq!(http_get(addr, "/metrics", None).await.0, 404);
    assert_eq!(http_get(addr, "/health", None).await.0, 404);
}

#[tokio::test]
async fn test_operational_endpoints_require_token() {
    let addr = start_server(RelayConfig {
        static_dir: static_dir(),
        metrics_token: Some("t0ken".into()),
        ..RelayConfig::default()
    })
    .await;

    assert_eq!(http_get(addr, "/metrics", None).await.0, 401);
    assert_eq!(http_get(addr, "/health", Some("wrong")).await.0, 401);

    let mut broadcaster = connect(addr).await;
    send(&mut broadcaster, json!({"type": "create-room"})).await;
    recv(&mut broadcaster).await;

    let (status, body) = http_get(addr, "/metrics", Some("t0ken")).await;
    assert_eq!(status, 200);
    assert!(body.contains("relay_rooms_created_total 1"));
    assert!(body.contains("relay_rooms_active 1"));

    let (status, body) = http_get(addr, "/health", Some("t0ken")).await;
    assert_eq!(status, 200);
    assert!(body.contains("\"rooms\":1"));
    assert!(body.contains("\"viewers\":0"));
}

#[tokio::test]
async fn test_shutdown_closes_rooms_and_sockets() {
    let (addr, relay) = start_relay(RelayConfig {
        static_dir: static_dir(),
        ..RelayConfig::default()
    })
    .await;

    let mut broadcaster = connect(addr).await;
    send(&mut broadcaster, json!({"type": "create-room"})).await;
    let code = recv(&mut broadcaster).await["roomCode"].as_str().unwrap().to_string();

    let mut viewer = connect(addr).await;
    send(&mut viewer, json!({"type": "join-room", "roomId": code})).await;
    assert_eq!(recv(&mut viewer).await["type"], "joined-room");
    assert_eq!(recv(&mut broadcaster).await["type"], "viewer-connect");

    relay.shutdown();

    assert_eq!(recv(&mut broadcaster).await, json!({"type": "room-closed"}));
    assert_eq!(recv(&mut viewer).await, json!({"type": "room-closed"}));
    expect_closed(&mut broadcaster).await;
    expect_closed(&mut viewer).await;
    assert_eq!(relay.connection_count(), 0);
}

#[tokio::test]
async fn test_viewer_rejoins_on_fresh_socket_after_room_closed() {
    let addr = start_server(RelayConfig {
        static_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public"),
        ..RelayConfig::default()
    })
    .await;

    // The shipped client opens a new socket when its room closes
    let (status, body) = http_get(addr, "/client.js", None).await;
    assert_eq!(status, 200);
    assert!(body.contains("case 'room-closed'"));
    assert!(body.contains("reconnect()"));

    let mut first = connect(addr).await;
    send(&mut first, json!({"type": "create-room"})).await;
    let code = recv(&mut first).await["roomCode"].as_str().unwrap().to_string();

    let mut viewer = connect(addr).await;
    send(&mut viewer, json!({"type": "join-room", "roomId": code})).await;
    assert_eq!(recv(&mut viewer).await["type"], "joined-room");
    recv(&mut first).await;

    first.close(None).await.unwrap();
    assert_eq!(recv(&mut viewer).await, json!({"type": "room-closed"}));

    let mut second = connect(addr).await;
    send(&mut second, json!({"type": "create-room"})).await;
    let next_code = recv(&mut second).await["roomCode"].as_str().unwrap().to_string();

    // The old socket stays bound to the closed room
    send(&mut viewer, json!({"type": "join-room", "roomId": next_code})).await;
    assert_eq!(recv(&mut viewer).await, json!({"type": "error", "message": "Already in a room"}));

    let mut fresh = connect(addr).await;
    send(&mut fresh, json!({"type": "join-room", "roomId": next_code})).await;
    assert_eq!(recv(&mut fresh).await["type"], "joined-room");
    assert_eq!(recv(&mut second).await["type"], "viewer-connect");
}
