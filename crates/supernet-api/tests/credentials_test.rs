#![allow(clippy::unwrap_used)]
// Integration tests for `CredentialManager` against a wiremock refresh endpoint.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use supernet_api::{CredentialEvent, CredentialManager, Error, RenewalError, Tokens};

// ── Helpers ─────────────────────────────────────────────────────────

const FAR_FUTURE: i64 = 4_000_000_000;

fn jwt(claims: &serde_json::Value) -> String {
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.c2ln",
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

fn access_token(addr: &str, exp: i64) -> String {
    jwt(&json!({ "addr": addr, "exp": exp }))
}

fn refresh_token(exp: i64) -> String {
    jwt(&json!({ "env": "test", "exp": exp }))
}

async fn setup() -> (MockServer, CredentialManager) {
    let server = MockServer::start().await;
    let creds = CredentialManager::new(Url::parse(&server.uri()).unwrap(), reqwest::Client::new());
    (server, creds)
}

fn refreshed(token: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "status": "success",
        "data": { "token": token, "refreshToken": refresh }
    }))
}

// ── Renewal ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_only_install_renews_immediately() {
    let (server, creds) = setup().await;
    let refresh = refresh_token(FAR_FUTURE);
    let new_access = access_token("0xwallet", FAR_FUTURE);
    let new_refresh = refresh_token(FAR_FUTURE + 1);

    Mock::given(method("POST"))
        .and(path("/v1/account/refresh-token"))
        .and(body_json(json!({ "refreshToken": refresh })))
        .respond_with(refreshed(&new_access, &new_refresh))
        .expect(1)
        .mount(&server)
        .await;

    let mut rx = creds.subscribe();
    creds
        .set_tokens(Tokens::refresh_only(refresh.clone()))
        .await
        .unwrap();

    assert_eq!(creds.valid_token().await.unwrap(), Some(new_access));
    assert_eq!(creds.wallet_address().as_deref(), Some("0xwallet"));
    assert_eq!(
        rx.try_recv().unwrap(),
        CredentialEvent::Updated {
            wallet_address: Some("0xwallet".into())
        }
    );
}

#[tokio::test]
async fn test_concurrent_renewals_share_one_request() {
    let (server, creds) = setup().await;
    let new_access = access_token("0xwallet", FAR_FUTURE);
    let refresh = refresh_token(FAR_FUTURE);

    Mock::given(method("POST"))
        .and(path("/v1/account/refresh-token"))
        .respond_with(refreshed(&new_access, &refresh).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    // Expired access token, live refresh token.
    creds
        .set_tokens(Tokens::pair(access_token("0xwallet", 1_000), refresh.clone()))
        .await
        .unwrap();

    let results = futures_util::future::join_all((0..8).map(|_| creds.valid_token())).await;

    for result in results {
        assert_eq!(result.unwrap().as_deref(), Some(new_access.as_str()));
    }
}

#[tokio::test]
async fn test_rejected_refresh_emits_failure_and_clears() {
    let (server, creds) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/account/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "error",
            "message": "Invalid refresh token",
            "errorCode": 4001
        })))
        .mount(&server)
        .await;

    let mut rx = creds.subscribe();
    let err = creds
        .set_tokens(Tokens::refresh_only(refresh_token(FAR_FUTURE)))
        .await
        .unwrap_err();

    let expected = RenewalError::Rejected {
        status: 401,
        code: Some(4001),
        message: "Invalid refresh token".into(),
    };
    assert!(
        matches!(&err, Error::Renewal(e) if *e == expected),
        "expected rejected renewal, got: {err:?}"
    );
    assert_eq!(rx.try_recv().unwrap(), CredentialEvent::RefreshFailed(expected));
    assert_eq!(rx.try_recv().unwrap(), CredentialEvent::Cleared);
    assert!(!creds.is_authenticated());
}

#[tokio::test]
async fn test_unparseable_refresh_response_fails() {
    let (server, creds) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/account/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = creds
        .set_tokens(Tokens::refresh_only(refresh_token(FAR_FUTURE)))
        .await;

    assert!(
        matches!(
            result,
            Err(Error::Renewal(RenewalError::MalformedResponse(_)))
        ),
        "expected MalformedResponse, got: {result:?}"
    );
    assert!(creds.refresh_token().is_none());
}

#[tokio::test]
async fn test_clear_after_install_emits_cleared() {
    let (_server, creds) = setup().await;
    creds
        .set_tokens(Tokens::pair(
            access_token("0xwallet", FAR_FUTURE),
            refresh_token(FAR_FUTURE),
        ))
        .await
        .unwrap();

    let mut rx = creds.subscribe();
    creds.clear();
    creds.clear();

    assert_eq!(rx.try_recv().unwrap(), CredentialEvent::Cleared);
    assert!(rx.try_recv().is_err());
    assert!(creds.valid_token().await.unwrap().is_none());
}
