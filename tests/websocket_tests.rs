mod support;

use std::time::Duration;

use lifeline::adapter::{WebSocketDialer, WebSocketTransport};
use lifeline::port::{Dialer, Transport};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

use support::websocket::{echo_server, hang_up_server};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn ping_is_acknowledged() {
    let (url, server) = echo_server().await;
    let transport = WebSocketTransport::connect(&url, None).await.unwrap();

    assert_ok!(timeout(WAIT, transport.ping()).await.unwrap());
    assert_ok!(timeout(WAIT, transport.ping()).await.unwrap());
    assert_eq!(transport.peer(), url);

    transport.close().await;
    server.abort();
}

#[tokio::test]
async fn text_frames_reach_inbound_channel() {
    let (url, server) = echo_server().await;
    let (tx, mut rx) = mpsc::channel(8);
    let transport = WebSocketTransport::connect(&url, Some(tx)).await.unwrap();

    transport.send_text("hello").await.unwrap();
    let echoed = timeout(WAIT, rx.recv()).await.unwrap();
    assert_eq!(echoed.as_deref(), Some("hello"));

    transport.close().await;
    server.abort();
}

#[tokio::test]
async fn closed_transport_rejects_pings() {
    let (url, server) = echo_server().await;
    let transport = WebSocketTransport::connect(&url, None).await.unwrap();

    transport.close().await;
    transport.close().await;

    assert!(transport.is_closed());
    assert!(transport.ping().await.is_err());
    assert!(transport.send_text("late").await.is_err());
    server.abort();
}

#[tokio::test]
async fn peer_hang_up_fails_pings() {
    let (url, server) = hang_up_server().await;
    let transport = WebSocketTransport::connect(&url, None).await.unwrap();

    let mut failed = false;
    for _ in 0..10 {
        match timeout(WAIT, transport.ping()).await {
            Ok(Err(_)) => {
                failed = true;
                break;
            }
            Ok(Ok(())) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(_) => panic!("ping hung after peer hang-up"),
        }
    }
    assert!(failed);
    server.abort();
}

#[tokio::test]
async fn dialer_opens_fresh_transports() {
    let (url, server) = echo_server().await;
    let dialer = WebSocketDialer::new(url.clone());
    assert_eq!(dialer.target(), url);

    let first = dialer.dial().await.unwrap();
    let second = dialer.dial().await.unwrap();
    timeout(WAIT, first.ping()).await.unwrap().unwrap();
    timeout(WAIT, second.ping()).await.unwrap().unwrap();

    first.close().await;
    timeout(WAIT, second.ping()).await.unwrap().unwrap();

    second.close().await;
    server.abort();
}

#[tokio::test]
async fn unreachable_url_fails_to_dial() {
    let dialer = WebSocketDialer::new("ws://127.0.0.1:1");
    assert!(dialer.dial().await.is_err());
}
