use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// A local WebSocket server that echoes text frames. Pings are answered by
/// tungstenite on the next read.
pub async fn echo_server() -> (String, JoinHandle<()>) {
    serve(|mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if ws.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    })
    .await
}

/// A local WebSocket server that completes the handshake and hangs up.
pub async fn hang_up_server() -> (String, JoinHandle<()>) {
    serve(|ws| async move {
        drop(ws);
    })
    .await
}

async fn serve<F, Fut>(handler: F) -> (String, JoinHandle<()>)
where
    F: Fn(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler(ws));
            }
        }
    });
    (format!("ws://{addr}"), server)
}
