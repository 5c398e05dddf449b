use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use synckode_relay::config::Config;
use synckode_relay::exec::ExecConfig;
use synckode_relay::AppState;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    _scratch: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let config = Config {
            exec: ExecConfig {
                scratch_dir: scratch.path().to_path_buf(),
                timeout: Duration::from_secs(30),
            },
            extra_rooms: vec!["integration".to_string()],
            ..Config::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let state = AppState::from_config(&config, None);
        tokio::spawn(async move {
            synckode_relay::serve(listener, state, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });
        Self {
            addr,
            shutdown: Some(tx),
            _scratch: scratch,
        }
    }

    async fn connect(&self) -> (Socket, String) {
        let (mut socket, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        let connected = next_event(&mut socket).await;
        assert_eq!(connected["type"], "connected");
        let id = connected["connectionId"].as_str().unwrap().to_string();
        (socket, id)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip events until one of type `kind` arrives.
async fn expect_event(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let event = next_event(socket).await;
        if event["type"] == kind {
            return event;
        }
    }
}

#[test_timeout::tokio_timeout_test(60)]
async fn room_join_edit_and_leave_over_websockets() {
    let server = TestServer::start().await;
    let (mut ada, ada_id) = server.connect().await;
    let (mut grace, grace_id) = server.connect().await;

    send(&mut ada, json!({ "type": "join-room", "roomId": "integration", "name": "Ada" })).await;
    let joined = expect_event(&mut ada, "room-joined").await;
    assert_eq!(joined["roomId"], "integration");
    assert_eq!(joined["members"].as_array().unwrap().len(), 1);

    send(&mut grace, json!({ "type": "join-room", "roomId": "integration", "name": "Grace" })).await;
    let joined = expect_event(&mut grace, "room-joined").await;
    assert_eq!(joined["members"].as_array().unwrap().len(), 2);
    let announced = expect_event(&mut ada, "user-joined").await;
    assert_eq!(announced["connectionId"], grace_id.as_str());
    assert_eq!(announced["name"], "Grace");

    send(
        &mut grace,
        json!({ "type": "code-change", "roomId": "integration", "code": "print('hi')", "language": "python" }),
    )
    .await;
    let update = expect_event(&mut ada, "code-update").await;
    assert_eq!(update["code"], "print('hi')");
    assert_eq!(update["language"], "python");

    send(&mut grace, json!({ "type": "request-code", "roomId": "integration" })).await;
    let current = expect_event(&mut grace, "code-update").await;
    assert_eq!(current["code"], "print('hi')");

    grace.close(None).await.unwrap();
    let left = expect_event(&mut ada, "user-left").await;
    assert_eq!(left["connectionId"], grace_id.as_str());
    let members = expect_event(&mut ada, "room-members").await;
    assert_eq!(members["members"][0]["connectionId"], ada_id.as_str());
}

#[test_timeout::tokio_timeout_test(60)]
async fn errors_go_to_the_sender_only() {
    let server = TestServer::start().await;
    let (mut ada, _) = server.connect().await;

    send(&mut ada, json!({ "type": "join-room", "roomId": "does-not-exist" })).await;
    let error = expect_event(&mut ada, "error").await;
    assert_eq!(error["message"], "Room not found.");

    ada.send(Message::Text("{ not json".into())).await.unwrap();
    let error = expect_event(&mut ada, "error").await;
    assert!(error["message"].as_str().unwrap().starts_with("Invalid message format:"));

    send(&mut ada, json!({ "type": "ping" })).await;
    expect_event(&mut ada, "pong").await;
}

#[test_timeout::tokio_timeout_test(60)]
async fn voice_signaling_is_relayed_between_peers() {
    let server = TestServer::start().await;
    let (mut ada, ada_id) = server.connect().await;
    let (mut grace, grace_id) = server.connect().await;

    send(&mut ada, json!({ "type": "voice-join", "roomId": "integration" })).await;
    let current = expect_event(&mut ada, "voice-current-users").await;
    assert_eq!(current["users"], json!([]));

    send(&mut grace, json!({ "type": "voice-join", "roomId": "integration" })).await;
    let current = expect_event(&mut grace, "voice-current-users").await;
    assert_eq!(current["users"][0]["connectionId"], ada_id.as_str());
    let joined = expect_event(&mut ada, "voice-user-joined").await;
    assert_eq!(joined["connectionId"], grace_id.as_str());

    let sdp = json!({ "type": "offer", "sdp": "v=0\r\n" });
    send(
        &mut ada,
        json!({ "type": "voice-offer", "roomId": "integration", "to": grace_id, "sdp": sdp }),
    )
    .await;
    let offer = expect_event(&mut grace, "voice-offer").await;
    assert_eq!(offer["from"], ada_id.as_str());
    assert_eq!(offer["sdp"], sdp);

    send(&mut grace, json!({ "type": "voice-leave", "roomId": "integration" })).await;
    let left = expect_event(&mut ada, "voice-user-left").await;
    assert_eq!(left["connectionId"], grace_id.as_str());
}

#[test_timeout::tokio_timeout_test(60)]
async fn terminal_run_streams_output_and_exit() {
    let server = TestServer::start().await;
    let (mut ada, _) = server.connect().await;

    send(&mut ada, json!({ "type": "terminal-run", "command": "echo hello-relay" })).await;
    let output = expect_event(&mut ada, "terminal-output").await;
    assert_eq!(output["data"], "hello-relay\n");
    assert_eq!(output["streamKind"], "stdout");
    let exit = expect_event(&mut ada, "terminal-exit").await;
    assert_eq!(exit["statusCode"], 0);

    send(&mut ada, json!({ "type": "terminal-run", "command": "curl example.com" })).await;
    let denied = expect_event(&mut ada, "terminal-output").await;
    assert_eq!(denied["streamKind"], "stderr");
    assert!(denied["data"].as_str().unwrap().contains("\"curl\" is not in the allowed list"));
    let exit = expect_event(&mut ada, "terminal-exit").await;
    assert_eq!(exit["statusCode"], 1);

    send(&mut ada, json!({ "type": "terminal-run", "command": "cat" })).await;
    send(&mut ada, json!({ "type": "terminal-input", "data": "echo-back\n" })).await;
    let echoed = expect_event(&mut ada, "terminal-output").await;
    assert_eq!(echoed["data"], "echo-back\n");
    send(&mut ada, json!({ "type": "terminal-kill" })).await;
    let notice = expect_event(&mut ada, "terminal-output").await;
    assert_eq!(notice["streamKind"], "system");
    let exit = expect_event(&mut ada, "terminal-exit").await;
    assert_eq!(exit["statusCode"], 130);
}
