//! Drive API client.

use std::time::Duration;

use cloudrive_upload::{BackendFuture, ChunkUpload, DriveBackend, ExistsResult, UploadError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::types::{ApiResponse, ChunkQuery, ExistsQuery};

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Errors from the drive client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request rejected ({code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("response missing data")]
    MissingData,

    #[error("invalid API token")]
    InvalidToken,
}

/// Connection settings for [`Client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_url: String,
    /// Bearer token. Empty means no `Authorization` header.
    pub token: String,
    /// Whole-request timeout.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Drive API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Creates a client from `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if !config.token.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", config.token))
                    .map_err(|_| Error::InvalidToken)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Looks up content by fingerprint within a folder.
    pub async fn exists(&self, folder_id: i64, hash: &str) -> Result<ExistsResult, Error> {
        let query = ExistsQuery { folder_id, hash };
        let resp = self
            .http
            .get(self.url("/file/exists"))
            .query(&query)
            .send()
            .await?;
        let body = read_body(resp).await?;
        let result = parse_envelope::<ExistsResult>(&body)?.ok_or(Error::MissingData)?;
        trace!(folder_id, hash, exists = result.exists, "existence check");
        Ok(result)
    }

    /// Sends one chunk as a raw octet-stream body.
    pub async fn put_chunk(&self, chunk: ChunkUpload) -> Result<(), Error> {
        let query = ChunkQuery {
            hash: &chunk.fingerprint,
            chunk_index: chunk.index,
            chunk_count: chunk.count,
            folder_id: chunk.folder_id,
            filename: &chunk.file_name,
            size: chunk.file_size,
        };
        let len = chunk.data.len();
        let resp = self
            .http
            .post(self.url("/file/chunk"))
            .query(&query)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.data)
            .send()
            .await?;
        let body = read_body(resp).await?;
        parse_envelope::<serde_json::Value>(&body)?;
        debug!(
            file = %chunk.file_name,
            chunk = chunk.index,
            count = chunk.count,
            bytes = len,
            "chunk accepted"
        );
        Ok(())
    }
}

async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, Error> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Decodes an [`ApiResponse`] and turns a non-zero `code` into an error.
pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, Error> {
    let resp: ApiResponse<T> = serde_json::from_slice(body)?;
    if resp.code != 0 {
        return Err(Error::Rejected {
            code: resp.code,
            msg: resp.msg,
        });
    }
    Ok(resp.data)
}

impl From<Error> for UploadError {
    fn from(e: Error) -> Self {
        UploadError::backend(e)
    }
}

impl DriveBackend for Client {
    fn check_exists(&self, folder_id: i64, fingerprint: &str) -> BackendFuture<'_, ExistsResult> {
        let fingerprint = fingerprint.to_string();
        Box::pin(async move { Ok(self.exists(folder_id, &fingerprint).await?) })
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> BackendFuture<'_, ()> {
        Box::pin(async move { Ok(self.put_chunk(chunk).await?) })
    }
}
