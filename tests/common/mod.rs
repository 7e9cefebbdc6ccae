//! Shared test infrastructure: fixture paths and an in-process WebSocket server

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

// ─────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Upper bound for any single wait in the network tests
pub const WAIT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────
// Mock WebSocket Server
// ─────────────────────────────────────────────────────────────────

/// Accepts WebSocket connections on a loopback port
pub struct MockServer {
    addr: std::net::SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    accepted: Arc<AtomicUsize>,
}

/// Server side of one accepted connection
pub struct ServerConn {
    pub path: String,
    ws: WebSocketStream<TcpStream>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let (tx, connections) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut path = String::new();
                let handshake = tokio_tungstenite::accept_hdr_async(
                    stream,
                    |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        path = req.uri().path().to_string();
                        Ok(resp)
                    },
                )
                .await;
                if let Ok(ws) = handshake {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if tx.send(ServerConn { path, ws }).is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            accepted,
        }
    }

    /// Base URL clients should use
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the next client to complete its handshake
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("server stopped")
    }
}

impl ServerConn {
    pub async fn send_json(&mut self, value: &Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .expect("send to client");
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send to client");
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.ws
            .send(Message::Binary(bytes.to_vec()))
            .await
            .expect("send to client");
    }

    /// Next text frame from the client; `None` once it closed
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a client frame");
            match frame {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Next text frame parsed as JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        Some(serde_json::from_str(&text).expect("client sent JSON"))
    }

    /// Orderly close with a close frame
    pub async fn close(mut self, reason: &str) {
        let _ = self
            .ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            }))
            .await;
    }

    /// Drop the TCP connection without a closing handshake
    pub fn kill(self) {
        drop(self.ws);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_exist() {
        assert!(fixtures_dir().exists());
        assert!(valid_config_fixture().exists());
        assert!(invalid_config_fixture().exists());
    }
}
