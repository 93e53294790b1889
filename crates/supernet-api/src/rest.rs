// Async HTTP client for the Supernet REST API.
//
// Success bodies are `{ "status": "success", "data": ... }`; failures are
// `{ "status": "error", "message": ..., "errorCode": ... }`.
// Auth: raw access token in the `Authorization` header, when one exists.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::auth::CredentialManager;
use crate::error::Error;
use crate::types::{
    DownloadUrlResponse, ImageUrlParams, ProjectResponse, RawProject, UploadUrlResponse,
};

// ── Envelopes ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

// ── Client ───────────────────────────────────────────────────────────

/// REST client sharing the session's credential manager.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: CredentialManager,
}

impl RestClient {
    pub fn new(base_url: Url, http: reqwest::Client, credentials: CredentialManager) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        Ok(match self.credentials.valid_token().await? {
            Some(token) => req.header(reqwest::header::AUTHORIZATION, token),
            None => req,
        })
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");

        let req = self.authorize(self.http.get(url).query(params)).await?;
        let resp = req.send().await?;
        Self::handle_response(resp).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let req = self.authorize(self.http.post(url).json(body)).await?;
        let resp = req.send().await?;
        Self::handle_response(resp).await
    }

    /// Upload raw bytes to a presigned URL. No auth header is attached.
    pub async fn put_presigned(&self, url: &str, body: Bytes, what: &str) -> Result<(), Error> {
        let url = Url::parse(url)?;
        debug!(bytes = body.len(), "PUT {}", url.path());

        let resp = self.http.put(url).body(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Api {
                status: status.as_u16(),
                code: Some(0),
                message: format!("Failed to upload {what}"),
            })
        }
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str::<ApiEnvelope<T>>(&body)
                .map(|envelope| envelope.data)
                .map_err(|e| {
                    let preview = body.chars().take(200).collect::<String>();
                    Error::Deserialization {
                        message: format!("{e} (body preview: {preview:?})"),
                        body,
                    }
                })
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let raw = resp.text().await.unwrap_or_default();

        if let Ok(err) = serde_json::from_str::<ErrorEnvelope>(&raw) {
            Error::Api {
                status: status.as_u16(),
                message: err.message.unwrap_or_else(|| status.to_string()),
                code: err.error_code,
            }
        } else {
            Error::Api {
                status: status.as_u16(),
                message: if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                },
                code: None,
            }
        }
    }

    // ━━ Endpoints ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Server snapshot of a project. Returns 404 while the server has not
    /// yet persisted it.
    pub async fn project(&self, project_id: &str) -> Result<RawProject, Error> {
        let resp: ProjectResponse = self.get(&format!("/v1/projects/{project_id}"), &[]).await?;
        Ok(resp.project)
    }

    pub async fn upload_url(&self, params: &ImageUrlParams) -> Result<String, Error> {
        let resp: UploadUrlResponse = self.get("/v1/image/uploadUrl", &params.query()).await?;
        Ok(resp.upload_url)
    }

    pub async fn download_url(&self, params: &ImageUrlParams) -> Result<String, Error> {
        let resp: DownloadUrlResponse = self.get("/v1/image/downloadUrl", &params.query()).await?;
        Ok(resp.download_url)
    }
}
