//! HTTP transport backed by `reqwest`.
//!
//! Requires the `http` feature.
//!
//! - `GET {subject}` with `Accept: application/ad+json` fetches a resource.
//! - `POST {server}/commit` submits a signed commit.
//! - Requests carry the `x-atomic-*` authentication headers when an agent is set.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{Transport, JSON_AD_MEDIA_TYPE};
use crate::agent::Agent;
use crate::error::{AtomicError, AtomicResult};

pub struct HttpTransport {
    client: Client,
    server_url: String,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    /// Uses a preconfigured client (timeouts, proxies, TLS).
    pub fn with_client(client: Client, server_url: impl Into<String>) -> Self {
        HttpTransport {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn authenticate(request: RequestBuilder, subject: &str, agent: Option<&Agent>) -> RequestBuilder {
        let Some(agent) = agent else {
            return request;
        };
        agent
            .auth_headers(subject, Utc::now().timestamp_millis())
            .into_iter()
            .fold(request, |request, (name, value)| request.header(name, value))
    }

    async fn send(request: RequestBuilder) -> AtomicResult<(StatusCode, String)> {
        let response: Response = request
            .send()
            .await
            .map_err(|e| AtomicError::network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AtomicError::network(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, subject: &str, agent: Option<&Agent>) -> AtomicResult<Value> {
        debug!(subject, "GET");
        let request = self.client.get(subject).header(ACCEPT, JSON_AD_MEDIA_TYPE);
        let (status, body) = Self::send(Self::authenticate(request, subject, agent)).await?;

        // Servers answer failures with an Error resource; the parser turns it
        // into the resource's error.
        match serde_json::from_str::<Value>(&body) {
            Ok(json) if json.is_object() => Ok(json),
            _ if status == StatusCode::NOT_FOUND => Err(AtomicError::NotFound(subject.to_string())),
            _ if !status.is_success() => Err(AtomicError::Server(format!("{status}: {body}"))),
            Ok(other) => Err(AtomicError::parse(format!(
                "expected a JSON-AD object from {subject}, got {other}"
            ))),
            Err(e) => Err(AtomicError::parse(format!(
                "invalid JSON from {subject}: {e}"
            ))),
        }
    }

    async fn post_commit(&self, commit: &Value) -> AtomicResult<Value> {
        let url = format!("{}/commit", self.server_url);
        debug!(%url, "POST commit");
        let request = self
            .client
            .post(&url)
            .header(ACCEPT, JSON_AD_MEDIA_TYPE)
            .header(CONTENT_TYPE, JSON_AD_MEDIA_TYPE)
            .body(serde_json::to_string(commit)?);
        let (status, body) = Self::send(request).await?;

        if status.is_client_error() {
            return Err(AtomicError::ServerRejected {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(AtomicError::Server(format!("{status}: {body}")));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        agent: Option<&Agent>,
    ) -> AtomicResult<Value> {
        debug!(url, "POST");
        let mut request = self.client.post(url).header(ACCEPT, JSON_AD_MEDIA_TYPE);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, JSON_AD_MEDIA_TYPE)
                .body(serde_json::to_string(body)?);
        }
        let (status, text) = Self::send(Self::authenticate(request, url, agent)).await?;

        match serde_json::from_str::<Value>(&text) {
            Ok(json) if json.is_object() => Ok(json),
            _ if status == StatusCode::NOT_FOUND => Err(AtomicError::NotFound(url.to_string())),
            _ if !status.is_success() => Err(AtomicError::Server(format!("{status}: {text}"))),
            _ => Err(AtomicError::parse(format!("expected a JSON-AD object from {url}"))),
        }
    }
}
