//! WebSocket Round-Trip Tests
//!
//! Runs a session over the real tungstenite transport against a local axum
//! WebSocket server that speaks the market data protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::mpsc;
use tokio::time::timeout;

use alpaca_streaming::{
    AlpacaStreams, Channel, ConnectionState, Credentials, SessionSettings, StreamEndpoints,
};

const TRADE: &str = r#"[{"T":"t","S":"AAPL","i":1,"x":"V","p":150.25,"s":100,"t":"2024-01-15T14:30:00Z","c":["@"],"z":"C"}]"#;

/// Text frames received by the server, in order.
type Received = mpsc::UnboundedSender<String>;

async fn ws_handler(ws: WebSocketUpgrade, State(received): State<Received>) -> Response {
    ws.on_upgrade(move |socket| market_data_server(socket, received))
}

/// Minimal market data server: greet, accept any credentials, echo the
/// subscription and publish one trade.
async fn market_data_server(mut socket: WebSocket, received: Received) {
    if socket
        .send(Message::Text(r#"[{"T":"success","msg":"connected"}]"#.into()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let text = text.as_str().to_string();
        let _ = received.send(text.clone());

        let reply: serde_json::Value = serde_json::from_str(&text).unwrap();
        let response = match reply["action"].as_str() {
            Some("auth") => r#"[{"T":"success","msg":"authenticated"}]"#.to_string(),
            Some("subscribe") => {
                let ack = serde_json::json!([{
                    "T": "subscription",
                    "trades": reply["trades"],
                    "quotes": [],
                    "bars": []
                }]);
                if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                    return;
                }
                TRADE.to_string()
            }
            _ => continue,
        };
        if socket.send(Message::Text(response.into())).await.is_err() {
            return;
        }
    }
}

async fn start_server() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/v2/iex", get(ws_handler))
        .with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rx)
}

#[tokio::test]
async fn test_session_streams_over_websocket() {
    let (addr, mut received) = start_server().await;

    let endpoints = StreamEndpoints {
        account: format!("ws://{addr}/stream"),
        stock: format!("ws://{addr}/v2/iex"),
        crypto: format!("ws://{addr}/v1beta3/crypto/us"),
    };
    let settings = SessionSettings {
        heartbeat_interval: Duration::ZERO,
        ..SessionSettings::default()
    };
    let session = AlpacaStreams::new(Credentials::key_pair("ws-key", "ws-secret").unwrap())
        .with_endpoints(endpoints)
        .with_settings(settings)
        .stock()
        .unwrap();

    let trades = Arc::new(AtomicUsize::new(0));
    let acks = Arc::new(AtomicUsize::new(0));
    let trade_counter = Arc::clone(&trades);
    let ack_counter = Arc::clone(&acks);
    session.on_trade(move |trade| {
        assert_eq!(trade.symbol, "AAPL");
        trade_counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    session.on_subscription(move |ack| {
        assert_eq!(ack.symbols(Channel::Trades), ["AAPL".to_string()]);
        ack_counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    session.subscribe(Channel::Trades, ["AAPL"]).unwrap();
    session.connect().unwrap();

    let auth = timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth, r#"{"action":"auth","key":"ws-key","secret":"ws-secret"}"#);

    let subscribe = timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscribe, r#"{"action":"subscribe","trades":["AAPL"]}"#);

    timeout(Duration::from_secs(5), async {
        while trades.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trade not delivered");

    assert_eq!(session.state(), ConnectionState::Streaming);
    session.disconnect().await;
    assert_eq!(trades.load(Ordering::SeqCst), 1);
    assert_eq!(acks.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = SessionSettings {
        heartbeat_interval: Duration::ZERO,
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(20),
        ..SessionSettings::default()
    };
    let session = AlpacaStreams::new(Credentials::key_pair("key", "secret").unwrap())
        .with_endpoints(StreamEndpoints {
            account: format!("ws://{addr}/stream"),
            stock: format!("ws://{addr}/v2/iex"),
            crypto: format!("ws://{addr}/v1beta3/crypto/us"),
        })
        .with_settings(settings)
        .stock()
        .unwrap();

    let reconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reconnects);
    session.on_state_change(move |state| {
        if state == ConnectionState::Reconnecting {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();
    session.connect().unwrap();

    timeout(Duration::from_secs(5), async {
        while reconnects.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session did not retry");

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}
