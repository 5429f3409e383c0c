//! End-to-end tests against a real WebSocket server on localhost.
//!
//! These exercise the tokio-tungstenite transport together with the
//! connection manager: frames on the wire, reconnect after a dropped server,
//! and the normal-closure handshake in both directions.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::channel::Channel;
use crate::config::{ConnectionConfig, Settings};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::context::ChannelContext;
use crate::endpoint::{Endpoint, Scheme};
use crate::multiplexer::{Multiplexer, OfferOutcome};
use crate::sample::{MotionSample, Sample};
use crate::test_helpers::wait_for_state;
use crate::transport::WsTransport;

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const RECONNECT_DELAY: Duration = Duration::from_millis(100);

const CLOSE_TIMEOUT: Duration = Duration::from_millis(300);

fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect_delay: RECONNECT_DELAY,
        connect_timeout: TEST_TIMEOUT,
        close_timeout: CLOSE_TIMEOUT,
    }
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("failed to bind");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for client")
        .expect("accept failed");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake failed")
}

/// Next text frame from the client, skipping control frames.
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let msg = timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("client went away")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return text.to_string();
        }
    }
}

fn motion_manager(port: u16) -> ConnectionManager {
    let config = connection_config();
    let endpoint = Endpoint::new(Channel::Motion, Scheme::Ws, Ipv4Addr::LOCALHOST, port, "/motion");
    ConnectionManager::new(endpoint, Arc::new(WsTransport::new(&config)), &config)
}

#[tokio::test]
async fn sample_arrives_as_json_envelope() {
    let (listener, port) = listen().await;
    let mut settings = Settings::default();
    settings.endpoint.base_port = port;
    settings.connection = connection_config();
    settings.session.status_interval = None;

    let transport = Arc::new(WsTransport::new(&settings.connection));
    let context = Arc::new(ChannelContext::new(settings.clone(), transport));
    context.set_host("127.0.0.1").unwrap();

    let mut server = accept_ws(&listener).await;
    let motion = context.manager(Channel::Motion).unwrap();
    wait_for_state(&motion, ConnectionState::Open).await;

    context.set_foreground(Some(Channel::Motion));
    let mux = Multiplexer::new(context.clone(), &settings.stream);
    let outcome = mux.offer(
        Channel::Motion,
        Sample::Motion(MotionSample {
            x: 1.5,
            y: -2.25,
            z: 9.81,
        }),
    );
    assert_eq!(outcome, OfferOutcome::Forwarded);

    assert_eq!(
        next_text(&mut server).await,
        r#"{"type":"motion","data":{"x":1.5,"y":-2.25,"z":9.81}}"#
    );
    context.teardown();
}

#[tokio::test]
async fn dropped_server_is_reconnected() {
    let (listener, port) = listen().await;
    let manager = motion_manager(port);
    manager.connect();

    let server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    // Drop the TCP connection without a close frame.
    drop(server);
    wait_for_state(&manager, ConnectionState::Closed).await;

    let mut server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    manager.send("after reconnect".into());
    assert_eq!(next_text(&mut server).await, "after reconnect");
    manager.shutdown();
}

#[tokio::test]
async fn normal_close_from_server_is_final() {
    let (listener, port) = listen().await;
    let manager = motion_manager(port);
    manager.connect();

    let mut server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();
    // Drain until the client completes the handshake, then drop TCP.
    while let Ok(Some(Ok(_))) = timeout(TEST_TIMEOUT, server.next()).await {}
    drop(server);

    wait_for_state(&manager, ConnectionState::Closed).await;
    assert!(
        timeout(RECONNECT_DELAY * 5, listener.accept()).await.is_err(),
        "client reconnected after a normal close"
    );
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn peer_going_away_without_dropping_tcp_still_reconnects() {
    let (listener, port) = listen().await;
    let manager = motion_manager(port);
    manager.connect();

    let mut server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    server
        .close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        }))
        .await
        .unwrap();
    wait_for_state(&manager, ConnectionState::Closing).await;

    // The server never drops TCP; the handshake bound ends the socket.
    wait_for_state(&manager, ConnectionState::Closed).await;
    let mut second = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    manager.send("back".into());
    assert_eq!(next_text(&mut second).await, "back");
    manager.shutdown();
    drop(server);
}

#[tokio::test]
async fn deliberate_close_sends_normal_closure() {
    let (listener, port) = listen().await;
    let manager = motion_manager(port);
    manager.connect();

    let mut server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;

    manager.close();
    let frame = loop {
        let msg = timeout(TEST_TIMEOUT, server.next())
            .await
            .expect("timed out waiting for close")
            .expect("client went away")
            .expect("read failed");
        if let Message::Close(frame) = msg {
            break frame;
        }
    };
    assert_eq!(frame.map(|f| f.code), Some(CloseCode::Normal));

    assert!(
        timeout(RECONNECT_DELAY * 5, listener.accept()).await.is_err(),
        "client reconnected after a deliberate close"
    );
}

#[tokio::test]
async fn refused_connection_keeps_retrying() {
    // Reserve a port, then free it so nothing is listening.
    let (listener, port) = listen().await;
    drop(listener);

    let manager = motion_manager(port);
    manager.connect();
    wait_for_state(&manager, ConnectionState::Closed).await;

    // Bring the server up; the next scheduled attempt finds it.
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .expect("port was taken in between");
    let _server = accept_ws(&listener).await;
    wait_for_state(&manager, ConnectionState::Open).await;
    manager.shutdown();
}
