use super::session::WebSocketSession;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::StreamExt;
use log::*;
use std::sync::Arc;

/// WebSocket handler that registers the connection for database notification broadcasts.
/// Text sent by the client is echoed back to that client only.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (sink, mut stream) = socket.split();
    let session = Arc::new(WebSocketSession::new(sink));
    let registry = app_state.registry.clone();
    let connection_id = registry.register(session.clone());

    loop {
        let received = tokio::select! {
            // Failed or timed-out send; the registry has already dropped this session
            _ = session.failed() => {
                debug!("WebSocket {connection_id} send failed, closing");
                break;
            }
            received = stream.next() => received,
        };

        match received {
            Some(Ok(Message::Text(text))) => {
                info!("Received from {connection_id}: {}", text.as_str());
                let response = format!("Echo from server: {}", text.as_str());
                if registry.send_direct(&connection_id, &response).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("WebSocket {connection_id} closed by client");
                break;
            }
            // Pings are answered by axum; binary frames are not part of the protocol
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket {connection_id} receive error: {e}");
                break;
            }
        }

        if !registry.contains(&connection_id) {
            break;
        }
    }

    registry.deregister(&connection_id);
    session.close().await;
}

#[cfg(test)]
mod tests {
    use crate::{define_routes, AppState};
    use clap::Parser;
    use futures::{SinkExt, StreamExt};
    use service::config::Config;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::watch;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use ws::{ConnectionRegistry, DispatchState, DispatchStatus};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serve the full router on an ephemeral port.
    async fn boot_server(registry: Arc<ConnectionRegistry>) -> SocketAddr {
        let config = Config::try_parse_from(["live_data_rs"]).unwrap();
        let (_tx, rx) = watch::channel(DispatchState::Draining);
        let state = AppState::new(config, registry, DispatchStatus::from(rx));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, define_routes(state)).await });
        addr
    }

    async fn wait_for_connections(registry: &ConnectionRegistry, expected: usize) {
        timeout(TIMEOUT, async {
            while registry.len() != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {expected} connections"));
    }

    /// Upgrade a plain TCP stream by hand so the test controls reads exactly.
    async fn raw_handshake(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await.unwrap();
            assert_eq!(n, 1, "server closed during handshake");
            response.push(byte[0]);
        }
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 101"), "{response}");
        stream
    }

    #[tokio::test]
    async fn text_frames_are_echoed_to_the_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let addr = boot_server(registry.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&registry, 1).await;

        socket.send(Message::Text("hi".into())).await.unwrap();
        let reply = timeout(TIMEOUT, socket.next()).await.unwrap().unwrap().unwrap();

        assert_eq!(reply.to_text().unwrap(), "Echo from server: hi");

        // The count is bumped after the frame is flushed, which can trail the client's read
        timeout(TIMEOUT, async {
            while registry.stats().connections[0].message_count != 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn broadcasts_reach_connected_clients() {
        let registry = Arc::new(ConnectionRegistry::new());
        let addr = boot_server(registry.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&registry, 1).await;

        let report = registry.broadcast(r#"{"type":"database_notification"}"#).await;
        assert_eq!(report.successful_sends, 1);

        let received = timeout(TIMEOUT, socket.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(received.to_text().unwrap(), r#"{"type":"database_notification"}"#);
    }

    #[tokio::test]
    async fn client_close_deregisters_the_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let addr = boot_server(registry.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&registry, 1).await;

        socket.close(None).await.unwrap();

        wait_for_connections(&registry, 0).await;
    }

    #[tokio::test]
    async fn timed_out_broadcast_closes_the_socket() {
        let registry = Arc::new(ConnectionRegistry::with_send_timeout(
            Duration::from_millis(50),
        ));
        let addr = boot_server(registry.clone()).await;

        let mut stream = raw_handshake(addr).await;
        wait_for_connections(&registry, 1).await;

        // Larger than the loopback socket buffers while the client is not reading
        let message = "x".repeat(64 * 1024 * 1024);
        let report = registry.broadcast(&message).await;

        assert_eq!(report.failed_sends, 1);
        assert!(registry.is_empty());

        // The server must hang up rather than leave an unregistered socket open
        let closed = timeout(TIMEOUT, async {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket still open after its session was dropped");
    }
}
