//! End-to-end tests over loopback TCP.
//!
//! Each test starts a real server on an ephemeral port and connects real
//! clients to it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tcpwire::handler::{check_response, ok_response, request, WAIT_TIMED_OUT};
use tcpwire::{
    ClientBuilder, DispatchMode, RpcClient, RpcServer, ServerBuilder, SessionId, TcpwireError,
};

const WAIT: Duration = Duration::from_secs(5);

fn echo_server() -> ServerBuilder {
    RpcServer::builder()
        .tick_interval(Duration::from_millis(50))
        .handle("Echo", |_session, req| ok_response(req, req["params"].clone()))
}

async fn start(builder: ServerBuilder) -> (RpcServer, SocketAddr) {
    let server = builder.build().unwrap();
    let addr = server
        .start_at(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    (server, addr)
}

async fn connect(builder: ClientBuilder, addr: SocketAddr) -> RpcClient {
    let client = builder
        .tick_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    client
        .connect("127.0.0.1", i64::from(addr.port()))
        .await
        .unwrap();
    client
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn parse(response: &str) -> Value {
    serde_json::from_str(response).unwrap()
}

#[tokio::test]
async fn test_sync_call_returns_matching_response() {
    let (_server, addr) = start(echo_server()).await;
    let client = connect(RpcClient::builder(), addr).await;

    let response = client
        .sync_call(&request(7, "Echo", json!({"text": "hi"})), None)
        .await;
    let value = check_response(&response).unwrap();

    assert_eq!(value["id"], 7);
    assert_eq!(value["method"], "Echo");
    assert_eq!(value["info"]["text"], "hi");
    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_sync_call_with_unbounded_timeout() {
    let (_server, addr) = start(echo_server()).await;
    let client = connect(RpcClient::builder(), addr).await;

    let response = tokio::spawn(async move {
        client
            .sync_call(&request(8, "Echo", json!("far")), Some(Duration::MAX))
            .await
    })
    .await
    .unwrap();

    assert_eq!(check_response(&response).unwrap()["info"], "far");
}

#[tokio::test]
async fn test_sync_call_inline_dispatch() {
    let (_server, addr) = start(echo_server().dispatch_mode(DispatchMode::Inline)).await;
    let client = connect(RpcClient::builder(), addr).await;

    for id in 0..20 {
        let response = client.sync_call(&request(id, "Echo", json!(id)), None).await;
        assert_eq!(check_response(&response).unwrap()["info"], id);
    }
}

#[tokio::test]
async fn test_sync_call_times_out_with_failure_response() {
    let (_server, addr) = start(echo_server()).await;
    let client = connect(RpcClient::builder(), addr).await;

    let started = std::time::Instant::now();
    let response = client
        .sync_call(
            &request(1, "Unanswered", json!({})),
            Some(Duration::from_millis(200)),
        )
        .await;
    let value = parse(&response);

    assert_eq!(value["id"], 1);
    assert_eq!(value["method"], "Unanswered");
    assert_eq!(value["result"], false);
    assert_eq!(value["error"]["errCode"], -1);
    assert_eq!(value["error"]["errMsg"], WAIT_TIMED_OUT);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_post_call_response_reaches_handler() {
    let (_server, addr) = start(echo_server()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = connect(
        RpcClient::builder().handle("Echo", move |_session, resp| {
            let _ = tx.send(resp.clone());
            String::new()
        }),
        addr,
    )
    .await;

    client
        .post_call(&request(3, "Echo", json!("posted")), None)
        .await
        .unwrap();

    let response = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"], true);
    assert_eq!(response["info"], "posted");
}

#[tokio::test]
async fn test_post_call_timeout_is_dispatched_locally() {
    let (_server, addr) = start(echo_server()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = connect(
        RpcClient::builder().handle("Unanswered", move |_session, resp| {
            let _ = tx.send(resp.clone());
            String::new()
        }),
        addr,
    )
    .await;

    client
        .post_call(
            &request(4, "Unanswered", json!({})),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    let response = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(response["id"], 4);
    assert_eq!(response["result"], false);
    assert_eq!(response["error"]["errCode"], -1);
}

#[tokio::test]
async fn test_duplicate_outstanding_call_is_rejected() {
    let (_server, addr) = start(echo_server()).await;
    let client = connect(RpcClient::builder(), addr).await;
    let req = request(9, "Unanswered", json!({}));

    client
        .post_call(&req, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    assert!(matches!(
        client.post_call(&req, None).await,
        Err(TcpwireError::DuplicateCall(ref key)) if key == "9@Unanswered"
    ));
    let response = parse(&client.sync_call(&req, None).await);
    assert_eq!(response["result"], false);
    assert_eq!(response["error"]["errCode"], -1);
    assert_eq!(client.outstanding_calls(), 1);
}

#[tokio::test]
async fn test_handler_sees_session_id() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let builder = echo_server().handle("WhoAmI", move |session: &SessionId, req| {
        let _ = tx.send(session.clone());
        ok_response(req, json!(session.as_str()))
    });
    let (server, addr) = start(builder).await;
    let client = connect(RpcClient::builder(), addr).await;

    let response = client.sync_call(&request(1, "WhoAmI", json!({})), None).await;
    let session = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    assert_eq!(check_response(&response).unwrap()["info"], session.as_str());
    assert!(server.session(session.as_str()).is_some());
}

#[tokio::test]
async fn test_reply_broadcast_and_targeted() {
    let (server, addr) = start(echo_server()).await;

    let mut clients = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = connect(
            RpcClient::builder().handle("Notice", move |_session, msg| {
                let _ = tx.send(msg["params"].clone());
                String::new()
            }),
            addr,
        )
        .await;
        clients.push(client);
        receivers.push(rx);
    }
    wait_until(|| server.session_count() == 2).await;

    server
        .reply("", &request(0, "Notice", json!("all")).to_string())
        .await;
    for rx in receivers.iter_mut() {
        let msg = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg, "all");
    }

    let target = server.sessions()[0].id().clone();
    server
        .reply(target.as_str(), &request(0, "Notice", json!("one")).to_string())
        .await;
    server
        .reply("no-such-session", &request(0, "Notice", json!("none")).to_string())
        .await;
    server
        .reply("   ", &request(0, "Notice", json!("blank")).to_string())
        .await;

    let mut delivered = 0;
    for rx in receivers.iter_mut() {
        if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
            assert_eq!(msg, "one");
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn test_server_calls_client() {
    let (server, addr) = start(echo_server()).await;
    let _client = connect(
        RpcClient::builder().handle("Status", |_session, req| {
            ok_response(req, json!({"busy": false}))
        }),
        addr,
    )
    .await;
    wait_until(|| server.session_count() == 1).await;

    let session = server.sessions()[0].id().clone();
    let response = server
        .sync_call(session.as_str(), &request(11, "Status", json!({})), None)
        .await;
    assert_eq!(check_response(&response).unwrap()["info"]["busy"], false);

    let unknown = parse(
        &server
            .sync_call("missing", &request(12, "Status", json!({})), None)
            .await,
    );
    assert_eq!(unknown["result"], false);
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    let (server, addr) = start(echo_server().on_session_closed(move |_id| {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
    .await;

    let client = connect(RpcClient::builder(), addr).await;
    wait_until(|| server.session_count() == 1).await;

    client.disconnect();
    assert!(!client.is_connected());

    wait_until(|| server.session_count() == 0).await;
    wait_until(|| closed.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_stop_closes_clients() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (server, addr) = start(echo_server()).await;
    let client = connect(
        RpcClient::builder().on_session_closed(move |id| {
            let _ = tx.send(id.clone());
        }),
        addr,
    )
    .await;
    wait_until(|| server.session_count() == 1).await;
    let own_id = client.session_id().unwrap();

    server.stop();
    assert!(!server.is_running());

    tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    assert!(!client.is_connected());
    assert_eq!(rx.recv().await, Some(own_id));

    let response = parse(&client.sync_call(&request(1, "Echo", json!({})), None).await);
    assert_eq!(response["result"], false);
}

#[tokio::test]
async fn test_binary_commands_both_ways() {
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let (server, addr) = start(echo_server().on_binary(move |_session, data: Bytes| {
        let _ = server_tx.send(data);
    }))
    .await;

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = connect(
        RpcClient::builder().on_binary(move |_session, data: Bytes| {
            let _ = client_tx.send(data);
        }),
        addr,
    )
    .await;

    client.send_binary(vec![1u8, 2, 3, 0xFF]).await.unwrap();
    let data = tokio::time::timeout(WAIT, server_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&data[..], &[1, 2, 3, 0xFF]);

    wait_until(|| server.session_count() == 1).await;
    server.sessions()[0]
        .send_binary(Bytes::from_static(b"pong"))
        .await
        .unwrap();
    let data = tokio::time::timeout(WAIT, client_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&data[..], b"pong");
}

#[tokio::test]
async fn test_large_payload_roundtrip() {
    let (_server, addr) = start(echo_server()).await;
    let client = connect(RpcClient::builder(), addr).await;

    let text = "z".repeat(200_000);
    let response = client
        .sync_call(&request(5, "Echo", json!(text)), None)
        .await;

    assert_eq!(check_response(&response).unwrap()["info"], text.as_str());
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = RpcClient::builder().build().unwrap();
    assert!(matches!(
        client.connect("127.0.0.1", i64::from(port)).await,
        Err(TcpwireError::Io(_))
    ));
    assert!(!client.is_connected());
}
