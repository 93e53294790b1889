// ── Credential lifecycle ──
//
// Holds the access/refresh token pair and their expiry instants.
// Renewal is single-flight: concurrent callers await one shared future
// and one network round trip.

use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use url::Url;

use crate::bus::EventBus;
use crate::error::{Error, RenewalError};
use crate::rest::{ApiEnvelope, ErrorEnvelope};

const REFRESH_PATH: &str = "/v1/account/refresh-token";

// ── Public types ─────────────────────────────────────────────────────

/// Tokens supplied at login or restored from storage.
///
/// When `token` is absent a renewal is performed immediately.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub token: Option<SecretString>,
    pub refresh_token: SecretString,
}

impl Tokens {
    pub fn refresh_only(refresh_token: impl Into<String>) -> Self {
        Self {
            token: None,
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    pub fn pair(token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretString::from(token.into())),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }
}

/// Credential notifications. Session-scoped caches reset on any of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A new token pair was installed.
    Updated { wallet_address: Option<String> },
    /// A non-empty credential was wiped.
    Cleared,
    /// Renewal failed; the credential is cleared right after this event.
    RefreshFailed(RenewalError),
}

// ── JWT claims ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccessClaims {
    exp: i64,
    #[serde(default)]
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshClaims {
    exp: i64,
    #[serde(default)]
    env: Option<String>,
}

fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T, String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| "token is not a JWT".to_owned())?;
    let raw = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| format!("bad token payload encoding: {e}"))?;
    serde_json::from_slice(&raw).map_err(|e| format!("bad token payload: {e}"))
}

fn expiry(exp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(exp, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct CredentialState {
    access: Option<SecretString>,
    access_expires_at: DateTime<Utc>,
    refresh: Option<SecretString>,
    refresh_expires_at: DateTime<Utc>,
    wallet_address: Option<String>,
    /// Bumped on every clear so an in-flight renewal cannot resurrect
    /// a credential that was wiped underneath it.
    generation: u64,
}

impl CredentialState {
    fn empty(generation: u64) -> Self {
        Self {
            access: None,
            access_expires_at: DateTime::UNIX_EPOCH,
            refresh: None,
            refresh_expires_at: DateTime::UNIX_EPOCH,
            wallet_address: None,
            generation,
        }
    }

    fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedTokens {
    token: String,
    refresh_token: String,
}

type RenewalFuture = Shared<BoxFuture<'static, Result<String, RenewalError>>>;

// ── CredentialManager ────────────────────────────────────────────────

/// Access/refresh token holder with transparent renewal.
///
/// Cheaply cloneable; all clones share the same credential.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<CredentialInner>,
}

struct CredentialInner {
    http: reqwest::Client,
    base_url: Url,
    state: ArcSwap<CredentialState>,
    in_flight: Mutex<Option<RenewalFuture>>,
    events: EventBus<CredentialEvent>,
}

impl CredentialManager {
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(CredentialInner {
                http,
                base_url,
                state: ArcSwap::from_pointee(CredentialState::empty(0)),
                in_flight: Mutex::new(None),
                events: EventBus::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.inner.events.subscribe()
    }

    /// `true` while a refresh token is installed and not yet expired.
    pub fn is_authenticated(&self) -> bool {
        let state = self.inner.state.load();
        state.refresh.is_some() && state.refresh_expires_at > Utc::now()
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.inner.state.load().wallet_address.clone()
    }

    /// Current refresh token, for persisting a session.
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.inner
            .state
            .load()
            .refresh
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
    }

    /// Install a credential. With only a refresh token, renews immediately.
    pub async fn set_tokens(&self, tokens: Tokens) -> Result<(), Error> {
        if let Some(token) = tokens.token {
            return self
                .inner
                .install(token.expose_secret(), tokens.refresh_token.expose_secret())
                .map_err(Error::InvalidToken);
        }

        let claims: RefreshClaims =
            decode_claims(tokens.refresh_token.expose_secret()).map_err(Error::InvalidToken)?;
        debug!(env = ?claims.env, "refresh-only login; renewing");
        let generation = self.inner.state.load().generation;
        self.inner.state.store(Arc::new(CredentialState {
            refresh: Some(tokens.refresh_token),
            refresh_expires_at: expiry(claims.exp),
            ..CredentialState::empty(generation)
        }));
        self.renew_token().await?;
        Ok(())
    }

    /// A non-expired access token, renewing first if needed.
    ///
    /// `Ok(None)` when no refresh token is installed; requests then go
    /// out unauthenticated.
    pub async fn valid_token(&self) -> Result<Option<String>, Error> {
        {
            let state = self.inner.state.load();
            if let Some(token) = state.access.as_ref() {
                if state.access_expires_at > Utc::now() {
                    return Ok(Some(token.expose_secret().to_owned()));
                }
            }
            if state.refresh.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(self.renew_token().await?))
    }

    /// Obtain a fresh access token. Concurrent callers share one request.
    pub async fn renew_token(&self) -> Result<String, RenewalError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock().await;
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let fut = async move {
                    let result = inner.renew_once().await;
                    *inner.in_flight.lock().await = None;
                    result
                }
                .boxed()
                .shared();
                *slot = Some(fut.clone());
                fut
            }
        };
        pending.await
    }

    /// Wipe the credential. Emits [`CredentialEvent::Cleared`] only if
    /// something was installed.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl CredentialInner {
    fn clear(&self) {
        let previous = self.state.load();
        if previous.is_empty() {
            return;
        }
        self.state
            .store(Arc::new(CredentialState::empty(previous.generation + 1)));
        info!("credentials cleared");
        self.events.emit(CredentialEvent::Cleared);
    }

    /// Install a full token pair. A pair identical to the current one is a no-op.
    fn install(&self, token: &str, refresh_token: &str) -> Result<(), String> {
        let current = self.state.load();
        let unchanged = current
            .access
            .as_ref()
            .is_some_and(|t| t.expose_secret() == token)
            && current
                .refresh
                .as_ref()
                .is_some_and(|t| t.expose_secret() == refresh_token);
        if unchanged {
            return Ok(());
        }

        let access: AccessClaims = decode_claims(token)?;
        let refresh: RefreshClaims = decode_claims(refresh_token)?;
        let wallet_address = access.addr.clone();

        self.state.store(Arc::new(CredentialState {
            access: Some(SecretString::from(token.to_owned())),
            access_expires_at: expiry(access.exp),
            refresh: Some(SecretString::from(refresh_token.to_owned())),
            refresh_expires_at: expiry(refresh.exp),
            wallet_address: access.addr,
            generation: current.generation,
        }));
        debug!(wallet = ?wallet_address, env = ?refresh.env, "credentials updated");
        self.events.emit(CredentialEvent::Updated { wallet_address });
        Ok(())
    }

    fn fail(&self, err: &RenewalError) {
        warn!(error = %err, "token renewal failed");
        self.events.emit(CredentialEvent::RefreshFailed(err.clone()));
        self.clear();
    }

    async fn renew_once(&self) -> Result<String, RenewalError> {
        let snapshot = self.state.load_full();
        let Some(refresh) = snapshot.refresh.as_ref() else {
            return Err(RenewalError::MissingRefreshToken);
        };
        if snapshot.refresh_expires_at <= Utc::now() {
            let err = RenewalError::RefreshTokenExpired;
            self.fail(&err);
            return Err(err);
        }

        let url = self
            .base_url
            .join(REFRESH_PATH)
            .map_err(|e| RenewalError::Transport(e.to_string()))?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({ "refreshToken": refresh.expose_secret() }))
            .send()
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        if !status.is_success() {
            let err = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => RenewalError::Rejected {
                    status: status.as_u16(),
                    code: envelope.error_code,
                    message: envelope.message.unwrap_or_else(|| status.to_string()),
                },
                Err(_) => RenewalError::Rejected {
                    status: status.as_u16(),
                    code: None,
                    message: status.to_string(),
                },
            };
            self.fail(&err);
            return Err(err);
        }

        let tokens = match serde_json::from_str::<ApiEnvelope<RefreshedTokens>>(&body) {
            Ok(envelope) => envelope.data,
            Err(e) => {
                let err = RenewalError::MalformedResponse(e.to_string());
                self.fail(&err);
                return Err(err);
            }
        };

        if self.state.load().generation != snapshot.generation {
            debug!("credentials cleared during renewal, discarding result");
            return Err(RenewalError::MissingRefreshToken);
        }

        self.install(&tokens.token, &tokens.refresh_token)
            .map_err(RenewalError::InvalidToken)?;
        Ok(tokens.token)
    }
}
