//! Push socket to the job-dispatch server.
//!
//! [`ConnectionManager`] owns at most one live connection. Each connection
//! runs in its own task: it performs the handshake, keeps the socket alive
//! with pings, writes queued outbound frames, and decodes inbound frames
//! into [`ServerEvent`]s published on a broadcast bus.
//!
//! Lifecycle events are synthesized locally:
//!
//! - [`SocketEvent::Connected`] once the handshake completes.
//! - [`SocketEvent::Disconnected`] exactly once when a connection is lost,
//!   and never for a connection torn down through
//!   [`disconnect`](ConnectionManager::disconnect) or a reconnect.
//!
//! Reconnection policy lives one level up, in the session facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::auth::CredentialManager;
use crate::bus::{EventBus, next_matching_within};
use crate::error::Error;
use crate::transport::user_agent;
use crate::wire::{ClientMessage, Network, ServerEvent};

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Close code reported when the transport drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a close frame without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Server base URL. `http`/`ws` map to `ws`, anything else to `wss`.
    pub url: Url,
    pub app_id: String,
    pub network: Network,
    pub ping_interval: Duration,
    /// Polls of the connecting state before `send` gives up.
    pub connect_wait_attempts: u32,
    pub connect_wait_interval: Duration,
    /// How long a network switch waits for the server's confirmation.
    pub switch_timeout: Duration,
}

impl SocketConfig {
    pub fn new(url: Url, app_id: impl Into<String>, network: Network) -> Self {
        Self {
            url,
            app_id: app_id.into(),
            network,
            ping_interval: Duration::from_secs(15),
            connect_wait_attempts: 10,
            connect_wait_interval: Duration::from_secs(1),
            switch_timeout: Duration::from_secs(30),
        }
    }

    fn connect_wait(&self) -> Duration {
        self.connect_wait_interval * self.connect_wait_attempts
    }
}

/// Build the socket URL with the client identity query parameters.
pub fn socket_url(base: &Url, app_id: &str, network: Network) -> Result<Url, Error> {
    let mut url = base.clone();
    let insecure = matches!(url.scheme(), "http" | "ws");
    url.set_scheme(if insecure { "ws" } else { "wss" })
        .map_err(|()| Error::WebSocketConnect(format!("unsupported socket URL: {base}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("appId", app_id)
        .append_pair("clientName", &user_agent())
        .append_pair("clientType", "artist")
        // The relaxed pool is selected by leaving the worker pin empty.
        .append_pair(
            "forceWorkerId",
            if network == Network::Fast { "fast" } else { "" },
        );
    Ok(url)
}

// ── Events & state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected { network: Network },
    Disconnected { code: Option<u16>, reason: String },
    Message(Arc<ServerEvent>),
}

// ── ConnectionManager ────────────────────────────────────────────────

struct Connection {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<SocketState>,
    task: JoinHandle<()>,
}

/// Persistent socket with keep-alive and send-with-wait.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: SocketConfig,
    credentials: CredentialManager,
    network: ArcSwap<Network>,
    current: Mutex<Option<Connection>>,
    events: EventBus<SocketEvent>,
    next_id: AtomicU64,
    switch_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: SocketConfig, credentials: CredentialManager) -> Self {
        let network = ArcSwap::from_pointee(config.network);
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                credentials,
                network,
                current: Mutex::new(None),
                events: EventBus::new(EVENT_CHANNEL_CAPACITY),
                next_id: AtomicU64::new(0),
                switch_lock: Mutex::new(()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    /// Network the server last confirmed (or the configured default).
    pub fn network(&self) -> Network {
        **self.inner.network.load()
    }

    /// `true` while a connection handle exists, open or still connecting.
    pub async fn is_connected(&self) -> bool {
        self.inner.current.lock().await.is_some()
    }

    pub async fn state(&self) -> SocketState {
        self.inner
            .current
            .lock()
            .await
            .as_ref()
            .map_or(SocketState::Closed, |c| *c.state.borrow())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open a new connection, tearing down any existing one first.
    ///
    /// Returns once the connection task is spawned; the handshake
    /// completes asynchronously and is announced with
    /// [`SocketEvent::Connected`].
    pub async fn connect(&self) -> Result<(), Error> {
        self.disconnect().await;

        let token = self.inner.credentials.valid_token().await?;
        let url = socket_url(&self.inner.config.url, &self.inner.config.app_id, self.network())?;
        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| {
                Error::WebSocketConnect(e.to_string())
            })?;

        let mut request = ClientRequestBuilder::new(uri).with_header("User-Agent", user_agent());
        if let Some(token) = token {
            request = request.with_header("Authorization", token);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SocketState::Connecting);

        // Hold the slot while spawning so an instant handshake failure
        // cannot run ahead of the handle being recorded.
        let mut current = self.inner.current.lock().await;
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            id,
            request,
            cancel.clone(),
            outbound_rx,
            state_tx,
        ));
        if let Some(stale) = current.replace(Connection {
            id,
            cancel,
            outbound: outbound_tx,
            state: state_rx,
            task,
        }) {
            // A concurrent connect raced us; the newest connection wins.
            stale.cancel.cancel();
        }
        debug!(connection = id, url = %url.host_str().unwrap_or_default(), "socket connection spawned");
        Ok(())
    }

    /// Close the current connection without emitting a lost-connection event.
    pub async fn disconnect(&self) {
        let Some(conn) = self.inner.current.lock().await.take() else {
            return;
        };
        conn.cancel.cancel();
        if let Err(e) = conn.task.await {
            warn!(error = %e, connection = conn.id, "socket task ended abnormally");
        }
        debug!(connection = conn.id, "socket disconnected");
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Send a message once the socket is open.
    ///
    /// Waits a bounded time for a connecting socket; on timeout the
    /// connection is dropped and [`Error::ConnectionTimeout`] returned.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), Error> {
        let (outbound, mut state) = {
            let current = self.inner.current.lock().await;
            let conn = current.as_ref().ok_or(Error::NotConnected)?;
            (conn.outbound.clone(), conn.state.clone())
        };

        self.wait_until_open(&mut state).await?;

        let text = message.encode()?;
        trace!(kind = message.kind(), "socket send");
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| Error::NotConnected)
    }

    async fn wait_until_open(&self, state: &mut watch::Receiver<SocketState>) -> Result<(), Error> {
        match *state.borrow() {
            SocketState::Open => return Ok(()),
            SocketState::Closed => return Err(Error::ConnectionFailed),
            SocketState::Connecting => {}
        }

        info!("waiting for socket connection");
        let outcome = tokio::time::timeout(
            self.inner.config.connect_wait(),
            state.wait_for(|s| *s != SocketState::Connecting),
        )
        .await
        .map(|r| r.map(|s| *s == SocketState::Open));

        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(_) => Err(Error::ConnectionFailed),
            Err(_) => {
                self.disconnect().await;
                Err(Error::ConnectionTimeout)
            }
        }
    }

    /// Ask the server to move this session to another worker pool and
    /// wait for its confirmation. Only one switch runs at a time.
    pub async fn switch_network(&self, network: Network) -> Result<Network, Error> {
        let _guard = self.inner.switch_lock.lock().await;
        let mut rx = self.subscribe();
        self.send(&ClientMessage::ChangeNetwork(network)).await?;

        let reply = next_matching_within(&mut rx, self.inner.config.switch_timeout, |event| {
            match event {
                SocketEvent::Message(msg) => match msg.as_ref() {
                    ServerEvent::ChangeNetwork(data) => Some(Ok(data.network)),
                    _ => None,
                },
                SocketEvent::Disconnected { .. } => Some(Err(Error::NotConnected)),
                SocketEvent::Connected { .. } => None,
            }
        })
        .await;

        let confirmed = reply.ok_or(Error::ReplyTimeout("changeNetwork"))??;
        info!(network = %confirmed, "network switched");
        Ok(confirmed)
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Handshake, then pump frames until the socket drops or is cancelled.
async fn run_connection(
    inner: Arc<ConnectionInner>,
    id: u64,
    request: ClientRequestBuilder,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    state: watch::Sender<SocketState>,
) {
    let handshake = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            state.send_replace(SocketState::Closed);
            return;
        }
        result = tokio_tungstenite::connect_async(request) => result,
    };

    let ws_stream = match handshake {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(error = %e, connection = id, "socket handshake failed");
            state.send_replace(SocketState::Closed);
            connection_lost(&inner, id, &cancel, Some(ABNORMAL_CLOSURE), e.to_string()).await;
            return;
        }
    };

    state.send_replace(SocketState::Open);
    let network = **inner.network.load();
    info!(connection = id, %network, "socket connected");
    inner.events.emit(SocketEvent::Connected { network });

    let (mut write, mut read) = ws_stream.split();
    let period = inner.config.ping_interval;
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let lost: Option<(Option<u16>, String)> = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break None;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = write.send(msg).await {
                    break Some((Some(ABNORMAL_CLOSURE), e.to_string()));
                }
            }
            _ = ping.tick() => {
                trace!(connection = id, "socket ping");
                if let Err(e) = write.send(Message::Ping(Bytes::new())).await {
                    break Some((Some(ABNORMAL_CLOSURE), e.to_string()));
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => dispatch(&inner, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch(&inner, text),
                        Err(e) => warn!(error = %e, "non-UTF-8 binary frame dropped"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (NO_STATUS_RECEIVED, String::new()),
                            |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                        );
                        info!(connection = id, code, %reason, "socket close frame received");
                        break Some((Some(code), reason));
                    }
                    Some(Err(e)) => break Some((Some(ABNORMAL_CLOSURE), e.to_string())),
                    None => break Some((Some(ABNORMAL_CLOSURE), "stream ended".to_owned())),
                    // Ping, Pong, raw frames: tungstenite answers pings itself
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    state.send_replace(SocketState::Closed);
    if let Some((code, reason)) = lost {
        connection_lost(&inner, id, &cancel, code, reason).await;
    }
}

/// Release the handle of connection `id` and announce the loss, unless
/// the connection was torn down on purpose.
async fn connection_lost(
    inner: &ConnectionInner,
    id: u64,
    cancel: &CancellationToken,
    code: Option<u16>,
    reason: String,
) {
    {
        let mut current = inner.current.lock().await;
        if current.as_ref().is_some_and(|c| c.id == id) {
            current.take();
        }
    }
    if cancel.is_cancelled() {
        return;
    }
    info!(connection = id, ?code, %reason, "socket connection lost");
    inner
        .events
        .emit(SocketEvent::Disconnected { code, reason });
}

fn dispatch(inner: &ConnectionInner, text: &str) {
    match ServerEvent::from_frame(text) {
        Ok(event) => {
            trace!(kind = event.kind(), "socket message");
            if let ServerEvent::ChangeNetwork(data) = &event {
                inner.network.store(Arc::new(data.network));
            }
            inner.events.emit(SocketEvent::Message(Arc::new(event)));
        }
        Err(e) => warn!(error = %e, "failed to parse socket message"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn https_base_maps_to_wss_with_identity_params() {
        let base = Url::parse("https://socket.example.com").unwrap();
        let url = socket_url(&base, "app-1", Network::Fast).unwrap();
        assert_eq!(url.scheme(), "wss");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("appId".into(), "app-1".into())));
        assert!(pairs.contains(&("clientType".into(), "artist".into())));
        assert!(pairs.contains(&("forceWorkerId".into(), "fast".into())));
        assert!(
            pairs
                .iter()
                .any(|(k, v)| k == "clientName" && v.starts_with("Sogni/3.0.0"))
        );
    }

    #[test]
    fn http_base_maps_to_ws_and_relaxed_clears_worker_pin() {
        let base = Url::parse("http://localhost:8080/?stale=1").unwrap();
        let url = socket_url(&base, "app-1", Network::Relaxed).unwrap();
        assert_eq!(url.scheme(), "ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(!pairs.iter().any(|(k, _)| k == "stale"));
        assert!(pairs.contains(&("forceWorkerId".into(), String::new())));
    }

    #[tokio::test]
    async fn send_without_connection_fails_fast() {
        let creds = CredentialManager::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            reqwest::Client::new(),
        );
        let manager = ConnectionManager::new(
            SocketConfig::new(Url::parse("ws://127.0.0.1:9").unwrap(), "app", Network::Fast),
            creds,
        );
        let err = manager
            .send(&ClientMessage::ChangeNetwork(Network::Fast))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(manager.state().await, SocketState::Closed);
    }
}
