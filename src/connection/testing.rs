//! Local gateway for connection and supervisor tests
//!
//! Accepts the `slack` sub-protocol, records every text frame per
//! connection and can answer pings, greet, or hang up on a timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// How the mock gateway treats each connection
#[derive(Debug, Clone, Default)]
pub(crate) struct GatewayBehavior {
    /// Reply to every ping with a matching pong
    pub answer_pings: bool,

    /// Text frames sent right after the handshake
    pub greeting: Vec<String>,

    /// Close the connection after this long
    pub hang_up_after: Option<Duration>,
}

/// What one client connection did
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordedConnection {
    pub uri: String,
    pub cookie: Option<String>,
    pub frames: Vec<String>,
    pub closed_by_client: bool,
}

impl RecordedConnection {
    pub fn ping_ids(&self) -> Vec<u64> {
        self.frames
            .iter()
            .filter_map(|f| serde_json::from_str::<Value>(f).ok())
            .filter(|v| v["type"] == "ping")
            .filter_map(|v| v["id"].as_u64())
            .collect()
    }
}

type Recorded = Arc<Mutex<RecordedConnection>>;

pub(crate) struct MockGateway {
    addr: SocketAddr,
    connections: Arc<Mutex<Vec<Recorded>>>,
    shutdown: CancellationToken,
}

impl MockGateway {
    pub async fn start(behavior: GatewayBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections: Arc<Mutex<Vec<Recorded>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let accepted = Arc::clone(&connections);
        let stop = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    result = listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let record = Recorded::default();
                            accepted.lock().push(Arc::clone(&record));
                            tokio::spawn(serve(stream, record, behavior.clone(), stop.clone()));
                        }
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> RecordedConnection {
        self.connections.lock()[index].lock().clone()
    }

    pub fn connections(&self) -> Vec<RecordedConnection> {
        self.connections.lock().iter().map(|c| c.lock().clone()).collect()
    }

    /// Poll until `count` connections were accepted or `within` elapses
    pub async fn wait_for_connections(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.connection_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.connection_count() >= count
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// URL of a local port with nothing listening on it
pub(crate) async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/", addr)
}

async fn serve(stream: TcpStream, record: Recorded, behavior: GatewayBehavior, stop: CancellationToken) {
    let handshake_record = Arc::clone(&record);
    let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let mut seen = handshake_record.lock();
        seen.uri = request.uri().to_string();
        seen.cookie = request
            .headers()
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("slack"));
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    for frame in &behavior.greeting {
        if write.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }

    let hang_up = async {
        match behavior.hang_up_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(hang_up);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = &mut hang_up => {
                let _ = write.close().await;
                break;
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let ping_id = serde_json::from_str::<Value>(&text)
                        .ok()
                        .filter(|v| v["type"] == "ping")
                        .and_then(|v| v["id"].as_u64());
                    record.lock().frames.push(text);

                    if let (true, Some(id)) = (behavior.answer_pings, ping_id) {
                        let pong = json!({ "type": "pong", "reply_to": id }).to_string();
                        if write.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                }
                // Keep reading so the close reply is flushed
                Some(Ok(Message::Close(_))) => record.lock().closed_by_client = true,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            }
        }
    }
}
