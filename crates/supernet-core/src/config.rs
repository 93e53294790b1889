// ── Runtime client configuration ──
//
// These types describe *where* to connect and *how* the engine is tuned.
// They never touch disk: supernet-config (or the application) builds a
// `ClientConfig` and hands it in.

use std::time::Duration;

use url::Url;

pub use supernet_api::{Network, TlsMode};

/// Default REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.sogni.ai";
/// Default socket endpoint.
pub const DEFAULT_SOCKET_URL: &str = "wss://socket.sogni.ai";

/// Timers and budgets used across the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Socket keep-alive ping period.
    pub ping_interval: Duration,
    /// Polls of a connecting socket before a send gives up.
    pub connect_wait_attempts: u32,
    pub connect_wait_interval: Duration,
    /// Delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Reconnect budget, restored on every successful connect.
    pub reconnect_attempts: u32,
    /// A non-terminal project silent for this long is pulled over REST.
    pub project_timeout: Duration,
    /// Consecutive failed pulls before a project is force-failed.
    pub max_failed_syncs: u32,
    /// How long a finished project stays in the active set.
    pub gc_delay: Duration,
    pub switch_timeout: Duration,
    /// Lifetime of resolved download URLs.
    pub url_cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
    /// Default wait for the first model list.
    pub models_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            connect_wait_attempts: 10,
            connect_wait_interval: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
            reconnect_attempts: 5,
            project_timeout: Duration::from_secs(60),
            max_failed_syncs: 3,
            gc_delay: Duration::from_secs(30),
            switch_timeout: Duration::from_secs(30),
            url_cache_ttl: Duration::from_secs(10 * 60),
            cache_sweep_interval: Duration::from_secs(10),
            models_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rest_url: Url,
    pub socket_url: Url,
    /// Identifies this client instance to the server. Must be unique per
    /// concurrently running client.
    pub app_id: String,
    /// Worker pool requested on connect.
    pub network: Network,
    /// REST-only mode: `authenticate` never opens the socket.
    pub disable_socket: bool,
    pub tls: TlsMode,
    /// HTTP request timeout.
    pub timeout: Duration,
    pub timings: Timings,
}

impl ClientConfig {
    /// Production endpoints with default tuning.
    pub fn new(app_id: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            rest_url: Url::parse(DEFAULT_REST_URL)?,
            socket_url: Url::parse(DEFAULT_SOCKET_URL)?,
            app_id: app_id.into(),
            network: Network::default(),
            disable_socket: false,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
            timings: Timings::default(),
        })
    }
}
