//! HTTP transport backed by `reqwest`.
//!
//! Every request carries the session's bearer token. Non-2xx responses are
//! turned into [`TransportError::Status`], using the server's `{"error": ..}`
//! field as the message when it sends one.

use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde_json::Value;
use url::Url;

use super::{Session, Transport, TransportError};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-over-HTTP transport to the task server.
pub struct HttpTransport {
    /// API root, always ending in `/` so relative joins stay under it.
    base_url: Url,
    session: Session,
    http: Client,
}

impl HttpTransport {
    /// Creates a transport for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidPath`] if `base_url` is not a valid
    /// absolute URL, or [`TransportError::Network`] if the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, session: Session) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, session, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_timeout(
        base_url: &str,
        session: Session,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut root = base_url.trim_end_matches('/').to_string();
        root.push('/');
        let base_url =
            Url::parse(&root).map_err(|_| TransportError::InvalidPath(base_url.to_string()))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            session,
            http,
        })
    }

    /// Resolves an API path (`/tasks?type=sent`) against the base URL.
    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|_| TransportError::InvalidPath(path.to_string()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        let url = self.url_for(path)?;
        tracing::debug!(%method, %url, "sending request");

        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.session.token);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        read_response(response).await
    }
}

/// Maps a response to its JSON body, or to a [`TransportError::Status`].
async fn read_response(response: Response) -> Result<Value, TransportError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;

    if !status.is_success() {
        let message = error_message(&text)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "request failed".to_string());
        return Err(TransportError::Status {
            status: status.as_u16(),
            message,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Extracts `error` (or `message`) from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.request(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.request(Method::DELETE, path, None).await
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
