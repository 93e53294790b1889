// ── Session (transport facade) ──
//
// Ties the credential manager, REST client, and push socket together and
// owns the reconnection policy. Transient socket drops are retried against
// a small budget; protocol-level rejections end the session at once.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use supernet_api::{
    ClientMessage, ConnectionManager, CredentialEvent, CredentialManager, EventBus,
    ImageUrlParams, Network, RawProject, RestClient, ServerEvent, SocketConfig, SocketEvent,
    Tokens, TransportConfig,
};

use crate::config::ClientConfig;
use crate::error::CoreError;

/// Close codes in this range mean the server rejected the session itself.
const UNRECOVERABLE_CLOSE_CODES: std::ops::RangeInclusive<u16> = 4000..=4999;

const SESSION_EVENT_CAPACITY: usize = 1024;

/// What the session tells the layers above it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { network: Network },
    /// The session ended and will not reconnect on its own. Emitted once
    /// per authenticated session.
    Disconnected { code: Option<u16>, reason: String },
    Message(Arc<ServerEvent>),
    /// Credentials were installed, renewed, or cleared (`None`).
    CredentialsUpdated { wallet_address: Option<String> },
}

/// Everything the project registry needs from the outside world.
#[async_trait]
pub trait ProjectBackend: Send + Sync + 'static {
    async fn send(&self, message: ClientMessage) -> Result<(), CoreError>;

    async fn fetch_project(&self, id: &str) -> Result<RawProject, CoreError>;

    async fn download_url(&self, params: &ImageUrlParams) -> Result<String, CoreError>;

    /// Upload `body` to a fresh presigned URL for `params`.
    async fn upload_image(
        &self,
        params: &ImageUrlParams,
        body: Bytes,
        what: &str,
    ) -> Result<(), CoreError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Whether a disconnect may be retried at all.
pub fn is_unrecoverable(code: Option<u16>) -> bool {
    code.is_none_or(|c| UNRECOVERABLE_CLOSE_CODES.contains(&c))
}

// ── Session ──────────────────────────────────────────────────────────

/// Cheaply cloneable handle to one client session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ClientConfig,
    credentials: CredentialManager,
    rest: RestClient,
    socket: ConnectionManager,
    events: EventBus<SessionEvent>,
    /// Reconnect attempts left in the current disconnect streak.
    budget: AtomicU32,
    /// Set once the terminal disconnect for this session has been emitted.
    terminated: AtomicBool,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("rest_url", &self.inner.config.rest_url.as_str())
            .field("app_id", &self.inner.config.app_id)
            .field("network", &self.inner.socket.network())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.timeout,
        };
        let http = transport.build_client()?;
        let credentials = CredentialManager::new(config.rest_url.clone(), http.clone());
        let rest = RestClient::new(config.rest_url.clone(), http, credentials.clone());

        let mut socket_config =
            SocketConfig::new(config.socket_url.clone(), &config.app_id, config.network);
        socket_config.ping_interval = config.timings.ping_interval;
        socket_config.connect_wait_attempts = config.timings.connect_wait_attempts;
        socket_config.connect_wait_interval = config.timings.connect_wait_interval;
        socket_config.switch_timeout = config.timings.switch_timeout;
        let socket = ConnectionManager::new(socket_config, credentials.clone());

        Ok(Self {
            inner: Arc::new(SessionInner {
                budget: AtomicU32::new(config.timings.reconnect_attempts),
                config,
                credentials,
                rest,
                socket,
                events: EventBus::new(SESSION_EVENT_CAPACITY),
                terminated: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    pub fn rest(&self) -> &RestClient {
        &self.inner.rest
    }

    pub fn network(&self) -> Network {
        self.inner.socket.network()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.socket.is_connected().await
    }

    /// Reconnect attempts left before the next drop becomes terminal.
    pub fn reconnect_budget(&self) -> u32 {
        self.inner.budget.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Install credentials, then open the socket unless it is disabled.
    pub async fn authenticate(&self, tokens: Tokens) -> Result<(), CoreError> {
        self.ensure_supervisor();
        self.inner.terminated.store(false, Ordering::SeqCst);
        self.inner.credentials.set_tokens(tokens).await?;
        info!(wallet = ?self.inner.credentials.wallet_address(), "authenticated");

        if self.inner.config.disable_socket {
            debug!("socket disabled; REST-only session");
            return Ok(());
        }
        self.inner.socket.connect().await?;
        Ok(())
    }

    /// Drop credentials and close the socket. Only the credential change is
    /// announced; no disconnect event is emitted.
    pub async fn remove_auth(&self) {
        self.inner.remove_auth().await;
    }

    /// Move the session to another worker pool.
    pub async fn switch_network(&self, network: Network) -> Result<Network, CoreError> {
        Ok(self.inner.socket.switch_network(network).await?)
    }

    /// Stop background work and close the socket.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.socket.disconnect().await;
        let handle = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session supervisor ended abnormally");
            }
        }
    }

    /// Start the supervisor task on first use. Receivers are created before
    /// the spawn so nothing emitted in between is missed.
    fn ensure_supervisor(&self) {
        let mut slot = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let socket_rx = self.inner.socket.subscribe();
        let credential_rx = self.inner.credentials.subscribe();
        *slot = Some(tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
            socket_rx,
            credential_rx,
        )));
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

async fn supervise(
    inner: Weak<SessionInner>,
    cancel: CancellationToken,
    mut socket_rx: broadcast::Receiver<SocketEvent>,
    mut credential_rx: broadcast::Receiver<CredentialEvent>,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = socket_rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_socket_event(event).await;
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "session lagged behind socket events"),
                Err(RecvError::Closed) => break,
            },
            event = credential_rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_credential_event(event).await;
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "session lagged behind credential events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("session supervisor stopped");
}

impl SessionInner {
    async fn on_socket_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connected { network } => {
                self.budget
                    .store(self.config.timings.reconnect_attempts, Ordering::SeqCst);
                self.events.emit(SessionEvent::Connected { network });
            }
            SocketEvent::Message(msg) => {
                self.events.emit(SessionEvent::Message(msg));
            }
            SocketEvent::Disconnected { code, reason } => {
                self.on_disconnected(code, reason).await;
            }
        }
    }

    async fn on_credential_event(&self, event: CredentialEvent) {
        match event {
            CredentialEvent::Updated { wallet_address } => {
                self.events
                    .emit(SessionEvent::CredentialsUpdated { wallet_address });
            }
            CredentialEvent::Cleared => {
                self.events.emit(SessionEvent::CredentialsUpdated {
                    wallet_address: None,
                });
            }
            CredentialEvent::RefreshFailed(e) => {
                warn!(error = %e, "credential refresh failed; removing auth");
                self.remove_auth().await;
            }
        }
    }

    /// One disconnect streak: delayed reconnects until one is accepted,
    /// or the end of the session.
    async fn on_disconnected(&self, code: Option<u16>, mut reason: String) {
        if is_unrecoverable(code) {
            self.terminate(code, reason).await;
            return;
        }
        loop {
            if !self.take_attempt() {
                warn!(?code, "reconnect budget exhausted");
                self.terminate(code, reason).await;
                return;
            }
            info!(
                ?code,
                %reason,
                remaining = self.budget.load(Ordering::SeqCst),
                "socket dropped; reconnecting"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.timings.reconnect_delay) => {}
            }
            if !self.credentials.is_authenticated() {
                debug!("credentials removed during reconnect delay; not reconnecting");
                return;
            }

            // A failed handshake comes back later as a fresh disconnect.
            match self.socket.connect().await {
                Ok(()) => return,
                Err(e) if e.is_auth_expired() => {
                    self.terminate(code, e.to_string()).await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect failed");
                    reason = e.to_string();
                }
            }
        }
    }

    fn take_attempt(&self) -> bool {
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn terminate(&self, code: Option<u16>, reason: String) {
        self.budget
            .store(self.config.timings.reconnect_attempts, Ordering::SeqCst);
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(?code, %reason, "session disconnected");
        self.credentials.clear();
        self.socket.disconnect().await;
        self.events.emit(SessionEvent::Disconnected { code, reason });
    }

    async fn remove_auth(&self) {
        self.credentials.clear();
        self.socket.disconnect().await;
    }
}

// ── Backend seam ─────────────────────────────────────────────────────

#[async_trait]
impl ProjectBackend for Session {
    async fn send(&self, message: ClientMessage) -> Result<(), CoreError> {
        Ok(self.inner.socket.send(&message).await?)
    }

    async fn fetch_project(&self, id: &str) -> Result<RawProject, CoreError> {
        Ok(self.inner.rest.project(id).await?)
    }

    async fn download_url(&self, params: &ImageUrlParams) -> Result<String, CoreError> {
        Ok(self.inner.rest.download_url(params).await?)
    }

    async fn upload_image(
        &self,
        params: &ImageUrlParams,
        body: Bytes,
        what: &str,
    ) -> Result<(), CoreError> {
        let url = self.inner.rest.upload_url(params).await?;
        self.inner.rest.put_presigned(&url, body, what).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn close_code_classification() {
        assert!(is_unrecoverable(None));
        assert!(is_unrecoverable(Some(4000)));
        assert!(is_unrecoverable(Some(4021)));
        assert!(is_unrecoverable(Some(4999)));
        assert!(!is_unrecoverable(Some(1006)));
        assert!(!is_unrecoverable(Some(1000)));
        assert!(!is_unrecoverable(Some(5000)));
    }

    #[tokio::test]
    async fn budget_counts_down_to_zero() {
        let session = Session::new(ClientConfig::new("test-app").unwrap()).unwrap();
        for _ in 0..5 {
            assert!(session.inner.take_attempt());
        }
        assert!(!session.inner.take_attempt());
        assert_eq!(session.reconnect_budget(), 0);
    }
}
