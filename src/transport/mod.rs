//! Transports - how the store talks to an Atomic server.
//!
//! The store only needs four things from a server: fetch a resource, accept a
//! signed commit, accept a generic authenticated POST, and (optionally) push
//! the subjects of resources that changed elsewhere.
//!
//! - [`InMemoryTransport`] is a complete in-process server double.
//! - `HttpTransport` (feature `http`) talks to a real server with `reqwest`.

#[cfg(feature = "http")]
mod http;
mod in_memory;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use in_memory::{EndpointHandler, InMemoryTransport};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::agent::Agent;
use crate::error::AtomicResult;

/// Media type of JSON-AD payloads.
pub const JSON_AD_MEDIA_TYPE: &str = "application/ad+json";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches the JSON-AD representation of `subject`. Requests are signed
    /// when an agent is given.
    async fn fetch(&self, subject: &str, agent: Option<&Agent>) -> AtomicResult<Value>;

    /// Submits a signed commit (as JSON-AD). Returns the server's commit
    /// resource, whose `@id` becomes the resource's `lastCommit`.
    async fn post_commit(&self, commit: &Value) -> AtomicResult<Value>;

    /// Authenticated POST to an arbitrary endpoint, returning JSON-AD.
    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        agent: Option<&Agent>,
    ) -> AtomicResult<Value>;

    /// Stream of subjects changed by other clients, if the transport pushes them.
    fn changes(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}
