//! Connection manager
//!
//! Single authority over the gateway transport. Each successful connect
//! starts a new [`Generation`]; the keepalive and refresh tasks spawned for
//! it carry that generation and stop acting as soon as it is superseded.
//! All mutable connection state sits behind one lock that is never held
//! across network I/O: handles are cloned out under the lock and used after
//! it is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    default_endpoint, display_endpoint, ConnectionConfig, ConnectionState, ConnectionStats,
    Credentials, Generation,
};
use crate::cache::EndpointCache;
use crate::error::{Error, Result};
use crate::protocol::{InboundFrame, OutboundFrame};

/// Sub-protocol the gateway expects during the handshake
const SUBPROTOCOL: &str = "slack";

/// Upper bound on sending a close frame to a peer that may be gone
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<AsyncMutex<SplitSink<WsStream, WsMessage>>>;
type WsReader = SplitStream<WsStream>;

// ─────────────────────────────────────────────────────────────────
// Internal State
// ─────────────────────────────────────────────────────────────────

/// Transport halves and stop signal of the live generation
struct Session {
    writer: WsWriter,

    /// Taken by the read loop when it attaches
    reader: Option<WsReader>,

    /// Cancelled when this generation ends, never reused
    stop: CancellationToken,
}

struct Inner {
    state: ConnectionState,
    generation: Generation,
    next_ping_id: u64,
    last_ping_id: Option<u64>,
    session: Option<Session>,

    /// Set by `disconnect`, cleared by `connect`
    closed_by_caller: bool,
}

impl Inner {
    fn is_current(&self, generation: Generation) -> bool {
        self.state == ConnectionState::Connected && self.generation == generation
    }
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    pings_sent: AtomicU64,
    pong_mismatches: AtomicU64,
    reconnect_hints: AtomicU64,
}

/// What the read loop does once a generation's reader has stopped
enum Next {
    /// A refresh installed a newer generation
    Adopt(Generation, WsReader, CancellationToken),
    /// `disconnect` was called
    Stopped,
    /// The connection is gone
    Failed(Error),
}

// ─────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────

/// Owns the gateway transport and its per-generation background tasks
pub struct ConnectionManager {
    config: ConnectionConfig,
    credentials: Credentials,
    cache: Arc<EndpointCache>,
    inner: Mutex<Inner>,
    counters: Counters,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, credentials: Credentials, cache: Arc<EndpointCache>) -> Self {
        Self {
            config,
            credentials,
            cache,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: Generation::default(),
                next_ping_id: 1,
                last_ping_id: None,
                session: None,
                closed_by_caller: false,
            }),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn generation(&self) -> Generation {
        self.inner.lock().generation
    }

    pub fn stats(&self) -> ConnectionStats {
        let (state, generation) = {
            let inner = self.inner.lock();
            (inner.state, inner.generation)
        };
        ConnectionStats {
            state,
            generation,
            connect_attempts: self.counters.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.counters.connect_failures.load(Ordering::Relaxed),
            pings_sent: self.counters.pings_sent.load(Ordering::Relaxed),
            pong_mismatches: self.counters.pong_mismatches.load(Ordering::Relaxed),
            reconnect_hints: self.counters.reconnect_hints.load(Ordering::Relaxed),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Connect / Disconnect
    // ─────────────────────────────────────────────────────────────

    /// Open the transport and start a new generation
    ///
    /// Already connected is not an error; the current generation is returned.
    pub async fn connect(&self) -> Result<Generation> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(inner.generation),
                ConnectionState::Connecting => {
                    return Err(Error::Internal("connect already in progress".to_string()))
                }
                ConnectionState::Disconnected => {}
            }
            inner.state = ConnectionState::Connecting;
            inner.closed_by_caller = false;
        }

        self.establish().await
    }

    /// Stop the current generation and close the transport
    ///
    /// Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let (session, generation) = {
            let mut inner = self.inner.lock();
            inner.closed_by_caller = true;
            inner.state = ConnectionState::Disconnected;
            (inner.session.take(), inner.generation)
        };

        let Some(session) = session else {
            return;
        };

        session.stop.cancel();
        close_writer(&session.writer).await;

        let stats = self.stats();
        info!(
            generation = %generation,
            pings_sent = stats.pings_sent,
            pong_mismatches = stats.pong_mismatches,
            "Disconnected from gateway"
        );
    }

    /// Dial and install; the caller has already moved the state to `Connecting`
    async fn establish(&self) -> Result<Generation> {
        match self.dial_preferred().await {
            Ok(stream) => self.install(stream).await,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.state == ConnectionState::Connecting {
                    inner.state = ConnectionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Dial the cached reconnect hint if allowed, then the default endpoint
    async fn dial_preferred(&self) -> Result<WsStream> {
        let cached = if self.config.use_reconnect_hint {
            self.cache.get()
        } else {
            String::new()
        };

        if !cached.is_empty() {
            match self.dial(&cached).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(
                        endpoint = %display_endpoint(&cached),
                        error = %e,
                        "Cached endpoint failed, falling back to default"
                    );
                    if let Err(e) = self.cache.clear() {
                        warn!(error = %e, "Failed to clear endpoint cache");
                    }
                }
            }
        }

        let url = default_endpoint(&self.config, &self.credentials.token)?;
        self.dial(url.as_str()).await
    }

    async fn dial(&self, url: &str) -> Result<WsStream> {
        let shown = display_endpoint(url);
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        info!(endpoint = %shown, "Connecting to gateway");

        let result = self.handshake(url, &shown).await;
        if let Err(ref e) = result {
            self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
            warn!(endpoint = %shown, error = %e, "Gateway handshake failed");
        }
        result
    }

    async fn handshake(&self, url: &str, shown: &str) -> Result<WsStream> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::connection_failed(shown, e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        let cookie = HeaderValue::from_str(&self.credentials.cookie)
            .map_err(|_| Error::config_validation("SLACK_COOKIE is not a valid header value"))?;
        headers.insert(COOKIE, cookie);
        if let Some(origin) = &self.config.origin {
            let origin = HeaderValue::from_str(origin)
                .map_err(|_| Error::config_field_invalid("connection.origin", "invalid header value"))?;
            headers.insert(ORIGIN, origin);
        }

        match timeout(self.config.handshake_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(Error::connection_failed(shown, e.to_string())),
            Err(_) => Err(Error::ConnectionTimeout {
                url: shown.to_string(),
                timeout_secs: self.config.handshake_timeout.as_secs(),
            }),
        }
    }

    /// Start generation N+1 on a freshly opened transport
    async fn install(&self, stream: WsStream) -> Result<Generation> {
        let (sink, source) = stream.split();
        let writer: WsWriter = Arc::new(AsyncMutex::new(sink));

        let installed = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connecting {
                inner.generation = inner.generation.next();
                inner.next_ping_id = 1;
                inner.last_ping_id = None;
                let previous = inner.session.replace(Session {
                    writer: Arc::clone(&writer),
                    reader: Some(source),
                    stop: CancellationToken::new(),
                });
                if let Some(previous) = previous {
                    previous.stop.cancel();
                }
                inner.state = ConnectionState::Connected;
                Some(inner.generation)
            } else {
                None
            }
        };

        match installed {
            Some(generation) => {
                info!(generation = %generation, "Connected to gateway");
                Ok(generation)
            }
            None => {
                // disconnect() ran while the handshake was in flight
                debug!("Dropping transport opened after disconnect");
                close_writer(&writer).await;
                Err(Error::NotConnected)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Read Loop
    // ─────────────────────────────────────────────────────────────

    /// Drive the connection until it fails or `disconnect` is called
    ///
    /// Spawns the keepalive and refresh tasks for the current generation and
    /// follows refreshes into later generations. Returns `Ok` only after an
    /// intentional disconnect; any other end of the connection is an error and
    /// leaves the manager `Disconnected`.
    pub async fn read_loop(self: &Arc<Self>) -> Result<()> {
        let (mut generation, mut reader, mut stop) = self.claim_reader().ok_or(Error::NotConnected)?;

        loop {
            debug!(generation = %generation, "Read loop attached");
            let keepalive = self.spawn_keepalive(generation, stop.clone());
            let refresh = self.spawn_refresh(generation, stop.clone());

            let outcome = self.read_frames(generation, &mut reader, &stop).await;

            stop.cancel();
            drop(reader);
            let _ = keepalive.await;
            // A refresh past its timer completes its reconnect before we decide
            let _ = refresh.await;

            match self.after_generation(generation, outcome) {
                Next::Adopt(next, next_reader, next_stop) => {
                    info!(from = %generation, to = %next, "Session refreshed");
                    generation = next;
                    reader = next_reader;
                    stop = next_stop;
                }
                Next::Stopped => {
                    debug!(generation = %generation, "Read loop stopped");
                    return Ok(());
                }
                Next::Failed(e) => {
                    let stats = self.stats();
                    warn!(
                        generation = %generation,
                        error = %e,
                        pings_sent = stats.pings_sent,
                        "Gateway connection lost"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn claim_reader(&self) -> Option<(Generation, WsReader, CancellationToken)> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return None;
        }
        let generation = inner.generation;
        let session = inner.session.as_mut()?;
        let reader = session.reader.take()?;
        Some((generation, reader, session.stop.clone()))
    }

    fn after_generation(&self, generation: Generation, outcome: Result<()>) -> Next {
        if let Some((next, reader, stop)) = self.claim_reader() {
            return Next::Adopt(next, reader, stop);
        }

        let mut inner = self.inner.lock();
        if inner.closed_by_caller {
            return Next::Stopped;
        }

        if inner.is_current(generation) {
            // Dropping the session releases the transport
            inner.session.take();
            inner.state = ConnectionState::Disconnected;
        }

        Next::Failed(
            outcome
                .err()
                .unwrap_or_else(|| Error::connection_lost("session refresh did not reconnect")),
        )
    }

    /// Read until the transport fails or this generation is stopped
    async fn read_frames(
        &self,
        generation: Generation,
        reader: &mut WsReader,
        stop: &CancellationToken,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                next = timeout(self.config.read_timeout, reader.next()) => next,
            };

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(Error::connection_lost("stream ended")),
                Err(_) => {
                    return Err(Error::ReadTimeout {
                        timeout_secs: self.config.read_timeout.as_secs(),
                    })
                }
            };

            match message {
                WsMessage::Text(text) => match InboundFrame::parse(&text) {
                    Ok(frame) => self.handle_frame(generation, frame),
                    Err(e) => warn!(generation = %generation, error = %e, "Unclassified frame"),
                },
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("closed by gateway ({}: {})", f.code, f.reason))
                        .unwrap_or_else(|| "closed by gateway".to_string());
                    return Err(Error::connection_lost(reason));
                }
                WsMessage::Binary(data) => {
                    debug!(generation = %generation, bytes = data.len(), "Ignoring binary frame");
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    /// Act on one inbound frame of `generation`
    fn handle_frame(&self, generation: Generation, frame: InboundFrame) {
        match frame {
            InboundFrame::Pong { reply_to } => {
                let expected = {
                    let inner = self.inner.lock();
                    if inner.generation != generation {
                        return;
                    }
                    inner.last_ping_id
                };

                if expected == Some(reply_to) {
                    debug!(generation = %generation, reply_to, "Pong received");
                } else {
                    self.counters.pong_mismatches.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        generation = %generation,
                        reply_to,
                        expected = ?expected,
                        "Pong does not match last ping"
                    );
                }
            }
            InboundFrame::ReconnectUrl { url } => {
                self.counters.reconnect_hints.fetch_add(1, Ordering::Relaxed);
                match self.cache.set(&url) {
                    Ok(()) => info!(
                        generation = %generation,
                        endpoint = %display_endpoint(&url),
                        "Stored reconnect endpoint"
                    ),
                    Err(e) => warn!(
                        generation = %generation,
                        error = %e,
                        "Reconnect endpoint kept in memory only"
                    ),
                }
            }
            InboundFrame::Hello { region, host_id } => {
                info!(
                    generation = %generation,
                    region = region.as_deref().unwrap_or("unknown"),
                    host_id = host_id.as_deref().unwrap_or("unknown"),
                    "Session established"
                );
            }
            other @ InboundFrame::Other { .. } => {
                info!(generation = %generation, kind = other.type_name(), "Received frame");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Background Tasks
    // ─────────────────────────────────────────────────────────────

    fn spawn_keepalive(self: &Arc<Self>, generation: Generation, stop: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let period = this.config.keepalive_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match this.send_ping(generation).await {
                    Ok(Some(id)) => debug!(generation = %generation, id, "Keepalive sent"),
                    Ok(None) => break,
                    Err(e) => {
                        // The read path notices the broken transport
                        warn!(generation = %generation, error = %e, "Keepalive send failed");
                        break;
                    }
                }
            }

            debug!(generation = %generation, "Keepalive task stopped");
        })
    }

    /// Send the next ping of `generation`, `None` once it is superseded
    async fn send_ping(&self, generation: Generation) -> Result<Option<u64>> {
        let Some(writer) = self.current_writer(generation) else {
            return Ok(None);
        };
        let mut sink = writer.lock().await;

        // A refresh may have replaced the generation while we waited for the writer
        let id = {
            let mut inner = self.inner.lock();
            if !inner.is_current(generation) {
                return Ok(None);
            }
            let id = inner.next_ping_id;
            inner.next_ping_id += 1;
            inner.last_ping_id = Some(id);
            id
        };

        let text = OutboundFrame::Ping { id }.to_json()?;
        sink.send(WsMessage::Text(text)).await?;
        self.counters.pings_sent.fetch_add(1, Ordering::Relaxed);
        Ok(Some(id))
    }

    fn current_writer(&self, generation: Generation) -> Option<WsWriter> {
        let inner = self.inner.lock();
        if !inner.is_current(generation) {
            return None;
        }
        inner.session.as_ref().map(|s| Arc::clone(&s.writer))
    }

    fn spawn_refresh(self: &Arc<Self>, generation: Generation, stop: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(this.config.refresh_interval) => {}
            }

            if let Err(e) = this.refresh(generation).await {
                warn!(generation = %generation, error = %e, "Session refresh failed");
            }
        })
    }

    /// Close the transport of `generation` and connect again in its place
    async fn refresh(&self, generation: Generation) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock();
            if !inner.is_current(generation) {
                return Ok(());
            }
            inner.state = ConnectionState::Connecting;
            inner.session.take()
        };

        info!(generation = %generation, "Refreshing session");
        if let Some(session) = session {
            session.stop.cancel();
            close_writer(&session.writer).await;
        }

        self.establish().await.map(|_| ())
    }
}

/// Send a close frame, bounded so a dead peer cannot stall the caller
async fn close_writer(writer: &WsWriter) {
    let closed = timeout(CLOSE_TIMEOUT, async {
        let mut sink = writer.lock().await;
        sink.close().await
    })
    .await;

    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
        Err(_) => debug!("Timed out closing transport"),
    }
}
