//! Transport abstraction and the WebSocket implementation
//!
//! A [`Connector`] turns an endpoint into a live transport handle. The handle
//! reports what happens to it as [`TransportEvent`]s, in the order the
//! underlying socket produces them, and takes outbound frames from an
//! [`Outbound`] queue. Every handle is tagged with a generation so the
//! channel can tell a live handle from a superseded one.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message as WsMessage},
};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

/// Close code reported when the connection drops without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Something that happened to a transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the handle can carry frames
    Open,
    /// A text frame (or a UTF-8 binary frame) arrived
    Message(String),
    /// Transport-level failure; a `Closed` event always follows
    Error(String),
    /// The handle is finished and will report nothing further
    Closed { code: u16, reason: String },
}

/// Frames written to a transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Generation-tagged event sender handed to a transport
#[derive(Debug, Clone)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl LinkEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns false once the channel has gone away
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Opens transport handles
///
/// `open` must not block. An `Err` means the handle could not even be
/// constructed (for instance an unparseable endpoint); no events will follow.
/// Anything that fails later is reported through `events` as
/// `Error` followed by `Closed`.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        endpoint: &str,
        events: LinkEvents,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<()>;
}

/// Validate an endpoint as a WebSocket URL
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|e| Error::invalid_endpoint(endpoint, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_endpoint(
                endpoint,
                format!("unsupported scheme '{}', expected ws or wss", other),
            ))
        }
    }
    if url.host_str().is_none() {
        return Err(Error::invalid_endpoint(endpoint, "missing host"));
    }

    Ok(url)
}

/// Endpoint of the progress stream for `task_id` under `base`
///
/// `ws://host:8000` becomes `ws://host:8000/task/<task_id>`; any path on
/// `base` is kept as a prefix.
pub fn task_endpoint(base: &str, task_id: &str) -> Result<String> {
    if task_id.trim().is_empty() {
        return Err(Error::invalid_endpoint(base, "task id is empty"));
    }

    let mut url = parse_endpoint(base)?;
    url.path_segments_mut()
        .map_err(|_| Error::invalid_endpoint(base, "URL cannot carry a path"))?
        .pop_if_empty()
        .push("task")
        .push(task_id);

    Ok(url.to_string())
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Connector
// ─────────────────────────────────────────────────────────────────

/// [`Connector`] backed by `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        endpoint: &str,
        events: LinkEvents,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<()> {
        let url = parse_endpoint(endpoint)?;
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            run_ws_link(url, connect_timeout, events, outbound).await;
        });

        Ok(())
    }
}

/// Drive one WebSocket from handshake to close
async fn run_ws_link(
    url: Url,
    connect_timeout: Duration,
    events: LinkEvents,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let generation = events.generation();

    let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(url.clone())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let err = Error::connection_failed(url.as_str(), e.to_string());
            fail(&events, err, "handshake failed");
            return;
        }
        Err(_) => {
            let err = Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_ms: connect_timeout.as_millis() as u64,
            };
            fail(&events, err, "handshake timed out");
            return;
        }
    };

    if !events.emit(TransportEvent::Open) {
        return;
    }
    debug!(generation, url = %url, "WebSocket link open");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        events.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            events.emit(TransportEvent::Message(text));
                        }
                        Err(e) => {
                            // Hand the lossy text on so the channel's parse
                            // failure path logs it
                            events.emit(TransportEvent::Message(
                                String::from_utf8_lossy(e.as_bytes()).into_owned(),
                            ));
                        }
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            fail(&events, Error::from(e), "pong write failed");
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = close_details(frame);
                        events.emit(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = Error::ConnectionLost { message: e.to_string() };
                        fail(&events, err, "read failed");
                        return;
                    }
                    None => {
                        events.emit(closed_abnormally("stream ended"));
                        return;
                    }
                }
            }

            frame = outbound.recv() => {
                match frame {
                    Some(Outbound::Text(text)) => {
                        trace!(generation, bytes = text.len(), "Writing frame");
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            fail(&events, Error::from(e), "write failed");
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        debug!(generation, "Closing WebSocket link");
                        let _ = write.send(WsMessage::Close(None)).await;
                        let _ = write.close().await;
                        events.emit(TransportEvent::Closed {
                            code: 1000,
                            reason: "closed by client".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}

/// Report `err` followed by the abnormal close that ends the handle
fn fail(events: &LinkEvents, err: Error, reason: &str) {
    events.emit(TransportEvent::Error(err.format_for_log()));
    events.emit(closed_abnormally(reason));
}

fn closed_abnormally(reason: &str) -> TransportEvent {
    TransportEvent::Closed {
        code: ABNORMAL_CLOSURE,
        reason: reason.to_string(),
    }
}

fn close_details(frame: Option<CloseFrame<'static>>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
        None => (1005, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_accepts_ws_and_wss() {
        assert!(parse_endpoint("ws://localhost:8000/task/abc").is_ok());
        assert!(parse_endpoint("wss://example.com/task/abc").is_ok());
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        let err = parse_endpoint("not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint { .. }));

        let err = parse_endpoint("http://example.com/task/abc").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_task_endpoint() {
        assert_eq!(
            task_endpoint("ws://localhost:8000", "abc-123").unwrap(),
            "ws://localhost:8000/task/abc-123"
        );
        assert_eq!(
            task_endpoint("wss://example.com/api/", "t1").unwrap(),
            "wss://example.com/api/task/t1"
        );
        // Segments are percent-encoded
        assert_eq!(
            task_endpoint("ws://h", "a b").unwrap(),
            "ws://h/task/a%20b"
        );
        assert!(task_endpoint("ws://h", " ").is_err());
        assert!(task_endpoint("http://h", "t").is_err());
    }

    #[test]
    fn test_link_events_tag_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = LinkEvents::new(7, tx);

        assert!(events.emit(TransportEvent::Open));
        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::Open));

        drop(rx);
        assert!(!events.emit(TransportEvent::Open));
    }

    #[tokio::test]
    async fn test_ws_connector_rejects_invalid_endpoint_synchronously() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();

        let result = WsConnector::default().open("::bad::", LinkEvents::new(1, tx), out_rx);

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ws_connector_reports_refused_connection() {
        // Bind then drop to get a port nothing is listening on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        WsConnector::new(Duration::from_secs(2))
            .open(&format!("ws://{}", addr), LinkEvents::new(3, tx), out_rx)
            .unwrap();

        let (gen, first) = rx.recv().await.unwrap();
        assert_eq!(gen, 3);
        match first {
            TransportEvent::Error(reason) => {
                assert!(reason.starts_with("[E300]"), "{}", reason);
                assert!(reason.contains(&addr.to_string()));
            }
            other => panic!("expected an error, got {:?}", other),
        }

        let (_, second) = rx.recv().await.unwrap();
        assert!(matches!(second, TransportEvent::Closed { code: ABNORMAL_CLOSURE, .. }));
    }

    #[tokio::test]
    async fn test_ws_connector_reports_handshake_timeout() {
        // Accepts the TCP connection but never answers the upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        WsConnector::new(Duration::from_millis(100))
            .open(&format!("ws://{}/task/t1", addr), LinkEvents::new(1, tx), out_rx)
            .unwrap();

        let (_, first) = rx.recv().await.unwrap();
        assert_eq!(
            first,
            TransportEvent::Error(format!(
                "[E301] Connection to ws://{}/task/t1 timed out after 100ms",
                addr
            ))
        );
        let (_, second) = rx.recv().await.unwrap();
        assert_eq!(
            second,
            TransportEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "handshake timed out".to_string()
            }
        );

        server.abort();
    }
}
