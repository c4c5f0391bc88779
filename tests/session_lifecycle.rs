//! End-to-end sessions against a real listener.

mod common;

use common::{connect, start_server, wait_for_live, ws_url};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

const STEP: Duration = Duration::from_secs(5);

/// Next message that is not a pong.
async fn next_data(ws: &mut common::Client) -> Message {
    loop {
        let message = timeout(STEP, ws.next())
            .await
            .expect("reply in time")
            .expect("stream open")
            .expect("valid message");
        if !message.is_pong() {
            return message;
        }
    }
}

/// Reads until the server ends the session.
async fn wait_closed(ws: &mut common::Client) {
    timeout(STEP, async {
        while let Some(message) = ws.next().await {
            match message {
                Ok(message) => verbose_println!("  after close: {:?}", message),
                Err(_) => break,
            }
        }
    })
    .await
    .expect("server ends the session");
}

#[tokio::test]
async fn ping_text_close_session() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws?token=abc").await;
    assert!(wait_for_live(&server, 1).await);

    ws.send(Message::Ping(vec![0x01, 0x02])).await.unwrap();
    let pong = timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(pong, Message::Pong(vec![0x01, 0x02]));

    ws.send(Message::Text("hi".to_string())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("hihi".to_string()));

    ws.close(None).await.unwrap();
    wait_closed(&mut ws).await;

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn echo_handles_empty_and_non_ascii_text() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws").await;

    for text in ["", "héllo 世界", "🦀"] {
        ws.send(Message::Text(text.to_string())).await.unwrap();
        assert_eq!(next_data(&mut ws).await, Message::Text(text.repeat(2)));
    }

    ws.send(Message::Ping(Vec::new())).await.unwrap();
    let pong = timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(pong, Message::Pong(Vec::new()));

    server.stop().await;
}

#[tokio::test]
async fn responses_follow_request_order() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws").await;

    for i in 0..20 {
        ws.send(Message::Text(i.to_string())).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_data(&mut ws).await, Message::Text(i.to_string().repeat(2)));
    }

    server.stop().await;
}

#[tokio::test]
async fn binary_frames_get_no_application_reply() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws").await;

    ws.send(Message::Binary(vec![9, 9, 9])).await.unwrap();
    ws.send(Message::Text("after".to_string())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("afterafter".to_string()));

    server.stop().await;
}

#[tokio::test]
async fn payload_limit_is_enforced() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws").await;
    assert!(wait_for_live(&server, 1).await);

    let at_limit = "a".repeat(65536);
    ws.send(Message::Text(at_limit.clone())).await.unwrap();
    match next_data(&mut ws).await {
        Message::Text(reply) => {
            assert_eq!(reply.len(), 131072);
            assert_eq!(reply, at_limit.repeat(2));
        }
        other => panic!("expected text echo, got {:?}", other),
    }

    // the write may already fail if the server has reset the socket
    let _ = ws.send(Message::Text("a".repeat(65537))).await;
    wait_closed(&mut ws).await;

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn wrong_path_is_rejected_without_upgrade() {
    let server = start_server("/ws").await;

    for target in ["/other", "/ws/extra", "/ws/", "/WS?token=abc"] {
        let result = connect_async(ws_url(&server, target)).await;
        assert!(result.is_err(), "{} should be rejected", target);
    }

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn rejected_client_sees_no_response_bytes() {
    let server = start_server("/ws").await;
    let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

    socket
        .write_all(
            b"GET /nope HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
              Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let mut buf = Vec::new();
    // a reset instead of an orderly close is fine too
    let _ = timeout(STEP, socket.read_to_end(&mut buf)).await.unwrap();
    assert!(buf.is_empty());

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn garbage_request_is_dropped() {
    let server = start_server("/ws").await;
    let mut socket = TcpStream::connect(server.local_addr()).await.unwrap();

    socket.write_all(b"\x00\x01 nonsense\r\n\r\n").await.unwrap();
    let mut buf = Vec::new();
    let _ = timeout(STEP, socket.read_to_end(&mut buf)).await.unwrap();
    assert!(buf.is_empty());

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn silent_client_times_out() {
    let server = start_server("/ws").await;
    let _socket = TcpStream::connect(server.local_addr()).await.unwrap();

    assert!(wait_for_live(&server, 1).await);
    // handshake timeout in the test config is two seconds
    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn client_disconnect_without_close_frame_is_cleaned_up() {
    let server = start_server("/ws").await;
    let ws = connect(&server, "/ws").await;
    assert!(wait_for_live(&server, 1).await);

    drop(ws);

    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_are_isolated() {
    let server = start_server("/ws").await;
    let url = ws_url(&server, "/ws?client=many");

    let clients: Vec<_> = (0..32)
        .map(|i| {
            let url = url.clone();
            tokio::spawn(async move {
                let (mut ws, _) = connect_async(url).await.expect("handshake succeeds");
                let text = format!("client-{}", i);
                ws.send(Message::Text(text.clone())).await.unwrap();
                assert_eq!(next_data(&mut ws).await, Message::Text(text.repeat(2)));
                if i % 2 == 0 {
                    ws.close(None).await.unwrap();
                    wait_closed(&mut ws).await;
                    None
                } else {
                    Some(ws)
                }
            })
        })
        .collect();

    let mut open = Vec::new();
    for client in clients {
        if let Some(ws) = client.await.unwrap() {
            open.push(ws);
        }
    }

    assert!(wait_for_live(&server, open.len()).await);
    assert_eq!(server.registry().snapshot().len(), 16);

    drop(open);
    assert!(wait_for_live(&server, 0).await);
    server.stop().await;
}

#[tokio::test]
async fn stop_closes_live_sessions() {
    let server = start_server("/ws").await;
    let mut ws = connect(&server, "/ws").await;
    assert!(wait_for_live(&server, 1).await);

    timeout(STEP, server.stop()).await.expect("stop drains in time");

    wait_closed(&mut ws).await;
}
