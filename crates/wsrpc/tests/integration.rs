//! End-to-end tests against a real websocket peer.

use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use wsrpc::{
    ConnectionConfig, ConnectionError, ConnectionSupervisor, Handlers, HandlerError,
    SupervisorState, TransportError, TransportOptions, register_defaults,
};
use wsrpc_core::load_settings_from_path;

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;

/// Accept one websocket connection. The task yields the request path and
/// the server side of the socket.
async fn serve_one() -> (String, JoinHandle<(String, ServerWs)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let (path_tx, path_rx) = tokio::sync::oneshot::channel();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = path_tx.send(req.uri().path().to_owned());
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        (path_rx.await.unwrap(), ws)
    });
    (format!("ws://{addr}/ocpp/"), task)
}

/// Next JSON text message, skipping control frames.
async fn next_json(ws: &mut ServerWs) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("server read timed out")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text, got {other:?}"),
        }
    }
}

/// Next close frame code, skipping everything else.
async fn next_close(ws: &mut ServerWs) -> Option<u16> {
    while let Some(msg) = timeout(TIMEOUT, ws.next()).await.expect("server read timed out") {
        if let Ok(Message::Close(frame)) = msg {
            return frame.map(|f| u16::from(f.code));
        }
    }
    None
}

fn quiet_transport() -> TransportOptions {
    TransportOptions {
        heartbeat: None,
        receive_timeout: None,
        ..Default::default()
    }
}

#[tokio::test]
async fn settings_file_identity_and_both_directions() {
    let (url, server) = serve_one().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("connection.json");
    std::fs::write(
        &path,
        json!({
            "url": url,
            "identity": "CP-0042",
            "name": "integration",
            "transport": {"heartbeatMs": 0, "receiveTimeoutMs": 0}
        })
        .to_string(),
    )
    .unwrap();
    let settings = load_settings_from_path(&path).unwrap();

    let mut handlers = Handlers::new();
    register_defaults(&mut handlers);
    let config = ConnectionConfig::from_settings(&settings, handlers);
    assert_eq!(config.transport.heartbeat, None);

    let supervisor = ConnectionSupervisor::websocket(config);
    let control = supervisor.control();
    let handle = tokio::spawn(supervisor.handle());

    let (path, mut ws) = timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(path, "/ocpp/CP-0042");
    let _ = timeout(TIMEOUT, control.wait_for(SupervisorState::Running))
        .await
        .unwrap();

    // peer calls us
    ws.send(Message::Text(
        r#"{"jsonrpc":"2.0","method":"rpc.ping","id":"s1"}"#.into(),
    ))
    .await
    .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply, json!({"jsonrpc": "2.0", "result": "pong", "id": "s1"}));

    // we call the peer
    let ctx = control.context().unwrap();
    let call = tokio::spawn(async move { ctx.request("Heartbeat", Some(json!({}))).await });
    let request = next_json(&mut ws).await;
    assert_eq!(request["method"], "Heartbeat");
    ws.send(Message::Text(
        json!({"jsonrpc": "2.0", "result": {"currentTime": "2024-01-01T00:00:00Z"}, "id": request["id"]})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    let result = timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap();
    assert_eq!(result["currentTime"], "2024-01-01T00:00:00Z");

    control.cancel();
    assert_matches!(
        timeout(TIMEOUT, handle).await.unwrap().unwrap(),
        Err(ConnectionError::Cancelled)
    );
    assert_eq!(next_close(&mut ws).await, Some(1001));
    assert_eq!(control.state(), SupervisorState::Closed);
}

#[tokio::test]
async fn server_close_ends_the_connection_cleanly() {
    let (url, server) = serve_one().await;
    let config = ConnectionConfig::builder(url)
        .identity("CP-1")
        .transport(quiet_transport())
        .build();
    let supervisor = ConnectionSupervisor::websocket(config);
    let control = supervisor.control();
    let handle = tokio::spawn(supervisor.handle());

    let (_, mut ws) = timeout(TIMEOUT, server).await.unwrap().unwrap();
    let _ = timeout(TIMEOUT, control.wait_for(SupervisorState::Running))
        .await
        .unwrap();
    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "bye".into(),
    }))
    .await
    .unwrap();

    assert_matches!(timeout(TIMEOUT, handle).await.unwrap().unwrap(), Ok(()));
}

#[tokio::test]
async fn pending_request_is_cancelled_when_peer_disappears() {
    let (url, server) = serve_one().await;
    let config = ConnectionConfig::builder(url)
        .transport(quiet_transport())
        .build();
    let supervisor = ConnectionSupervisor::websocket(config);
    let control = supervisor.control();
    let handle = tokio::spawn(supervisor.handle());

    let (_, mut ws) = timeout(TIMEOUT, server).await.unwrap().unwrap();
    let _ = timeout(TIMEOUT, control.wait_for(SupervisorState::Running))
        .await
        .unwrap();
    let ctx = control.context().unwrap();
    let call = tokio::spawn(async move { ctx.request("never.answered", None).await });
    let _ = next_json(&mut ws).await;
    drop(ws);

    let outcome = timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert!(!matches!(outcome, Err(ConnectionError::Cancelled)));
    assert_matches!(
        timeout(TIMEOUT, call).await.unwrap().unwrap(),
        Err(wsrpc::RpcError::Cancelled)
    );
}

#[tokio::test]
async fn rejected_handshake_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
            Err(http::Response::builder()
                .status(http::StatusCode::UNAUTHORIZED)
                .body(None)
                .unwrap())
        };
        let _ = tokio_tungstenite::accept_hdr_async(tcp, callback).await;
    });

    let config = ConnectionConfig::builder(format!("ws://{addr}/"))
        .transport(quiet_transport())
        .build();
    let err = timeout(TIMEOUT, ConnectionSupervisor::websocket(config).handle())
        .await
        .unwrap()
        .unwrap_err();
    assert_matches!(err, ConnectionError::Transport(TransportError::Connect(msg)) if msg.contains("401"));
}

#[tokio::test]
async fn handler_errors_reach_the_peer_as_error_responses() {
    let (url, server) = serve_one().await;
    let mut handlers = Handlers::new();
    handlers.register_fn("Authorize", |params| async move {
        match params.as_ref().and_then(|p| p.get("idTag")) {
            Some(tag) => Ok::<_, HandlerError>(json!({"idTagInfo": {"status": "Accepted", "tag": tag}})),
            None => Err(HandlerError::invalid_params("idTag is required")),
        }
    });
    let config = ConnectionConfig::builder(url)
        .transport(quiet_transport())
        .handlers(handlers)
        .build();
    let supervisor = ConnectionSupervisor::websocket(config);
    let control = supervisor.control();
    let handle = tokio::spawn(supervisor.handle());
    let (_, mut ws) = timeout(TIMEOUT, server).await.unwrap().unwrap();

    ws.send(Message::Text(
        r#"{"jsonrpc":"2.0","method":"Authorize","params":{"idTag":"ABC"},"id":1}"#.into(),
    ))
    .await
    .unwrap();
    assert_eq!(next_json(&mut ws).await["result"]["idTagInfo"]["status"], "Accepted");

    ws.send(Message::Text(
        r#"{"jsonrpc":"2.0","method":"Authorize","params":{},"id":2}"#.into(),
    ))
    .await
    .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["id"], 2);

    control.cancel();
    let _ = timeout(TIMEOUT, handle).await.unwrap();
}
