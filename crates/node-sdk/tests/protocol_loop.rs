//! Integration test: boots an in-process WebSocket server that plays the
//! Stagehand server side of the protocol, connects a real [`NodeClient`],
//! and asserts the full handshake + exec cycle:
//!
//! - `hello` carries the declared capability set, `auth` the token
//! - accepted handshake enters the message loop
//! - whitelisted `exec` dispatches to the plugin and answers with a
//!   correlated `exec_result`
//! - a non-whitelisted action is denied by the node-side gate even though
//!   the plugin implements it
//! - a path outside the allowed prefixes is denied
//! - `auth_ack { accepted: false }` is fatal: the client stops retrying
//! - a dropped connection triggers a fresh handshake (reconnect)

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use stagehand_node_sdk::{
    ActionPolicy, Envelope, ErrorKind, ExecStatus, NodeClientBuilder, NodeClientError, Plugin,
    PluginRegistry, PluginResult, ReconnectBackoff,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

struct ExplorerStub;

#[async_trait::async_trait]
impl Plugin for ExplorerStub {
    fn name(&self) -> &str {
        "explorer"
    }
    fn actions(&self) -> Vec<String> {
        vec!["ping".into(), "open_folder".into()]
    }
    async fn invoke(&self, action: &str, params: serde_json::Value) -> PluginResult {
        match action {
            "ping" => Ok(serde_json::json!({"pong": true})),
            "open_folder" => Ok(serde_json::json!({"opened": params["path"]})),
            _ => unreachable!(),
        }
    }
}

/// One accepted node connection, after the server-side handshake.
struct ServerConn {
    /// Capabilities the node declared in `hello`.
    capabilities: Vec<String>,
    /// Push envelopes to the node.
    send: mpsc::Sender<Envelope>,
    /// Envelopes received from the node (handshake excluded).
    recv: mpsc::Receiver<Envelope>,
}

/// Minimal in-process server: accepts connections, performs the
/// hello/auth handshake (accepting iff the token matches), and relays
/// envelopes through channels so tests can script the server side.
async fn start_mini_server(expected_token: &str) -> (SocketAddr, mpsc::Receiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let expected_token = expected_token.to_string();

    let (conn_tx, conn_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            let expected_token = expected_token.clone();
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut stream) = ws.split();

                // Handshake: collect hello + auth in any order.
                let mut hello: Option<(String, Vec<String>)> = None;
                let mut auth: Option<(String, String)> = None;
                while hello.is_none() || auth.is_none() {
                    let Some(Ok(Message::Text(text))) = stream.next().await else {
                        return;
                    };
                    match Envelope::decode(&text).unwrap() {
                        Envelope::Hello {
                            id, capabilities, ..
                        } => hello = Some((id, capabilities)),
                        Envelope::Auth { id, token } => auth = Some((id, token)),
                        _ => {}
                    }
                }
                let (hello_id, capabilities) = hello.unwrap();
                let (auth_id, token) = auth.unwrap();

                if token != expected_token {
                    let nack = Envelope::AuthAck {
                        correlation_id: auth_id,
                        accepted: false,
                        reason: Some("bad token".into()),
                    };
                    let _ = sink
                        .send(Message::Text(nack.encode().unwrap()))
                        .await;
                    return;
                }

                for env in [
                    Envelope::AuthAck {
                        correlation_id: auth_id,
                        accepted: true,
                        reason: None,
                    },
                    Envelope::HelloAck {
                        correlation_id: hello_id,
                        session_id: "s-test".into(),
                        server_version: "0.0.0-test".into(),
                    },
                ] {
                    sink.send(Message::Text(env.encode().unwrap()))
                        .await
                        .unwrap();
                }

                let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(16);
                let (in_tx, in_rx) = mpsc::channel::<Envelope>(16);
                let _ = conn_tx
                    .send(ServerConn {
                        capabilities,
                        send: out_tx,
                        recv: in_rx,
                    })
                    .await;

                loop {
                    tokio::select! {
                        env = out_rx.recv() => {
                            // Channel closed = test wants the connection dropped.
                            let Some(env) = env else { return };
                            if sink.send(Message::Text(env.encode().unwrap())).await.is_err() {
                                return;
                            }
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(env) = Envelope::decode(&text) {
                                        let _ = in_tx.send(env).await;
                                    }
                                }
                                Some(Ok(_)) => {}
                                _ => return,
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, conn_rx)
}

fn test_client(addr: SocketAddr, token: &str, policy: ActionPolicy) -> stagehand_node_sdk::NodeClient {
    NodeClientBuilder::new()
        .server_url(format!("ws://{addr}/ws"))
        .node_id("bay-3")
        .token(token)
        .policy(policy)
        .heartbeat_interval(Duration::from_secs(1))
        .reconnect_backoff(ReconnectBackoff {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            ..Default::default()
        })
        .build()
        .unwrap()
}

fn explorer_registry() -> PluginRegistry {
    let mut plugins = PluginRegistry::new();
    plugins.register(ExplorerStub);
    plugins
}

/// Wait for the next non-heartbeat envelope from the node.
async fn next_result(conn: &mut ServerConn) -> Envelope {
    loop {
        let env = tokio::time::timeout(Duration::from_secs(5), conn.recv.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("connection closed");
        if !matches!(env, Envelope::Heartbeat { .. }) {
            return env;
        }
    }
}

#[tokio::test]
async fn exec_round_trip_with_node_side_gate() {
    let (addr, mut conns) = start_mini_server("secret").await;

    let policy = ActionPolicy::new(
        ["explorer.ping".to_string()],
        std::iter::empty::<std::path::PathBuf>(),
    );
    let client = test_client(addr, "secret", policy);
    let shutdown = CancellationToken::new();
    let handle = client.spawn(explorer_registry(), shutdown.clone());

    let mut conn = conns.recv().await.expect("node never connected");
    assert_eq!(conn.capabilities, vec!["explorer"]);

    // Whitelisted action completes with the original correlation id.
    conn.send
        .send(Envelope::Exec {
            id: "c-1".into(),
            action: "explorer.ping".into(),
            params: serde_json::json!({}),
            timeout_ms: None,
        })
        .await
        .unwrap();

    match next_result(&mut conn).await {
        Envelope::ExecResult {
            correlation_id,
            status,
            data,
            error,
        } => {
            assert_eq!(correlation_id, "c-1");
            assert_eq!(status, ExecStatus::Ok);
            assert_eq!(data.unwrap(), serde_json::json!({"pong": true}));
            assert!(error.is_none());
        }
        other => panic!("expected exec_result, got {other:?}"),
    }

    // The plugin implements open_folder, but it is not whitelisted: the
    // node-side gate denies it.
    conn.send
        .send(Envelope::Exec {
            id: "c-2".into(),
            action: "explorer.open_folder".into(),
            params: serde_json::json!({"path": "/projects/show"}),
            timeout_ms: None,
        })
        .await
        .unwrap();

    match next_result(&mut conn).await {
        Envelope::ExecResult {
            correlation_id,
            status,
            error,
            ..
        } => {
            assert_eq!(correlation_id, "c-2");
            assert_eq!(status, ExecStatus::Error);
            assert_eq!(error.unwrap().kind, ErrorKind::Denied);
        }
        other => panic!("expected exec_result, got {other:?}"),
    }

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn path_outside_allowed_prefixes_is_denied() {
    let (addr, mut conns) = start_mini_server("secret").await;

    let policy = ActionPolicy::new(
        ["explorer.open_folder".to_string()],
        ["/projects".into()],
    );
    let client = test_client(addr, "secret", policy);
    let shutdown = CancellationToken::new();
    let handle = client.spawn(explorer_registry(), shutdown.clone());

    let mut conn = conns.recv().await.expect("node never connected");
    conn.send
        .send(Envelope::Exec {
            id: "c-3".into(),
            action: "explorer.open_folder".into(),
            params: serde_json::json!({"path": "/etc/passwd"}),
            timeout_ms: None,
        })
        .await
        .unwrap();

    match next_result(&mut conn).await {
        Envelope::ExecResult { status, error, .. } => {
            assert_eq!(status, ExecStatus::Error);
            let error = error.unwrap();
            assert_eq!(error.kind, ErrorKind::Denied);
            assert!(error.message.contains("allowed path"));
        }
        other => panic!("expected exec_result, got {other:?}"),
    }

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn auth_rejection_is_fatal_not_retried() {
    let (addr, mut conns) = start_mini_server("secret").await;

    let client = test_client(addr, "wrong-token", ActionPolicy::default());
    let shutdown = CancellationToken::new();
    let handle = client.spawn(explorer_registry(), shutdown.clone());

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("client kept retrying after rejection")
        .unwrap();
    assert!(matches!(result, Err(NodeClientError::AuthRejected(_))));

    // No session was ever established.
    assert!(conns.try_recv().is_err());
}

#[tokio::test]
async fn dropped_connection_triggers_full_rehandshake() {
    let (addr, mut conns) = start_mini_server("secret").await;

    let client = test_client(addr, "secret", ActionPolicy::default());
    let shutdown = CancellationToken::new();
    let handle = client.spawn(explorer_registry(), shutdown.clone());

    let first = conns.recv().await.expect("node never connected");
    // Dropping the connection's channels closes the server side.
    drop(first);

    // The client must come back with a complete handshake, capabilities
    // re-declared.
    let second = tokio::time::timeout(Duration::from_secs(5), conns.recv())
        .await
        .expect("node did not reconnect")
        .unwrap();
    assert_eq!(second.capabilities, vec!["explorer"]);

    shutdown.cancel();
    let _ = handle.await;
}
