//! HTTP download handler.
//!
//! Partial downloads use an HTTP `Range` header. A server that ignores the
//! header and answers `200 OK` with the whole body is handled by slicing the
//! requested bytes out locally.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::{debug, trace};
use url::Url;

use crate::range::Range;
use crate::service::{DownloadHandler, Downloaded, ServiceError, ServiceParams};
use crate::BoxFuture;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Downloads over `http://` and `https://`.
#[derive(Debug, Clone)]
pub struct HttpDownloadHandler {
    client: reqwest::Client,
}

impl HttpDownloadHandler {
    /// Creates a handler with the default timeout.
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a handler with a custom request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::General(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, uri: &Url, range: &Range) -> Result<Downloaded, ServiceError> {
        let mut request = self.client.get(uri.clone());
        let header = range_header(range);
        if let Some(value) = &header {
            request = request.header(RANGE, value.as_str());
        }
        trace!(uri = %uri, range = header.as_deref().unwrap_or("all"), "HTTP GET");

        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        check_status(status, uri)?;

        let partial = status == StatusCode::PARTIAL_CONTENT;
        let total_size = if partial {
            content_range_total(response.headers())
        } else {
            response.content_length()
        };
        let body = response.bytes().await.map_err(request_error)?;

        let data = if partial || header.is_none() {
            body
        } else {
            debug!(uri = %uri, "server ignored range request");
            slice_body(body, range)
        };
        Ok(Downloaded { data, total_size })
    }

    async fn head(&self, uri: &Url) -> Result<bool, ServiceError> {
        let response = self
            .client
            .head(uri.clone())
            .send()
            .await
            .map_err(request_error)?;
        match check_status(response.status(), uri) {
            Ok(()) => Ok(true),
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Value of the `Range` header for `range`, or `None` for the whole file.
fn range_header(range: &Range) -> Option<String> {
    if range.is_whole_file() {
        return None;
    }
    if range.goes_to_eof() {
        return Some(format!("bytes={}-", range.start()));
    }
    let last = range.end_byte().saturating_sub(1).max(range.start());
    Some(format!("bytes={}-{}", range.start(), last))
}

/// Total size from `Content-Range: bytes a-b/total`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn slice_body(body: Bytes, range: &Range) -> Bytes {
    let len = body.len() as u64;
    let start = range.start().min(len);
    let end = if range.goes_to_eof() {
        len
    } else {
        range.end_byte().min(len)
    };
    body.slice(start as usize..end as usize)
}

fn check_status(status: StatusCode, uri: &Url) -> Result<(), ServiceError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {status} from {uri}");
    Err(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ServiceError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Forbidden(message),
        s if s.is_server_error() => ServiceError::Network(message),
        _ => ServiceError::General(message),
    })
}

fn request_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ServiceError::Network(e.to_string())
    } else {
        ServiceError::General(e.to_string())
    }
}

impl DownloadHandler for HttpDownloadHandler {
    fn download<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
        range: &'a Range,
    ) -> BoxFuture<'a, Result<Downloaded, ServiceError>> {
        Box::pin(self.fetch(uri, range))
    }

    fn exists<'a>(
        &'a self,
        uri: &'a Url,
        _params: &'a ServiceParams,
    ) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(self.head(uri))
    }
}
