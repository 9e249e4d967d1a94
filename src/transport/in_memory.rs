use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::Transport;
use crate::agent::Agent;
use crate::commit::Commit;
use crate::error::{AtomicError, AtomicResult};
use crate::urls;

/// Handler for a POST endpoint served by [`InMemoryTransport`].
pub type EndpointHandler = Arc<dyn Fn(Option<&Value>) -> AtomicResult<Value> + Send + Sync>;

/// An in-process Atomic server.
///
/// Holds resources as JSON-AD objects, verifies commit signatures against the
/// signer's `publicKey`, enforces `previousCommit`, and counts every request
/// so tests can assert on network traffic.
pub struct InMemoryTransport {
    server_url: String,
    resources: Arc<RwLock<HashMap<String, Value>>>,
    fetches: Arc<RwLock<HashMap<String, usize>>>,
    commits: Arc<RwLock<Vec<Commit>>>,
    endpoints: Arc<RwLock<HashMap<String, EndpointHandler>>>,
    commit_seq: AtomicU64,
    offline: AtomicBool,
    latency: Option<Duration>,
    changes: broadcast::Sender<String>,
}

impl InMemoryTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(64);
        InMemoryTransport {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            resources: Arc::new(RwLock::new(HashMap::new())),
            fetches: Arc::new(RwLock::new(HashMap::new())),
            commits: Arc::new(RwLock::new(Vec::new())),
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            commit_seq: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            latency: None,
            changes,
        }
    }

    /// Delays every request, so fetches stay in flight under a paused clock.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Stores a JSON-AD object under its `@id`.
    pub fn insert(&self, resource: Value) -> AtomicResult<()> {
        let subject = resource
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| AtomicError::parse("resource needs a string @id"))?
            .to_string();
        self.resources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject, resource);
        Ok(())
    }

    /// Publishes the agent's public key so its commits verify.
    pub fn register_agent(&self, agent: &Agent) -> AtomicResult<()> {
        let mut object = Map::new();
        object.insert("@id".into(), Value::String(agent.subject().to_string()));
        object.insert(
            urls::IS_A.into(),
            Value::Array(vec![Value::String(urls::AGENT.into())]),
        );
        object.insert(urls::PUBLIC_KEY.into(), Value::String(agent.public_key()));
        self.insert(Value::Object(object))
    }

    pub fn register_endpoint<F>(&self, url: impl Into<String>, handler: F)
    where
        F: Fn(Option<&Value>) -> AtomicResult<Value> + Send + Sync + 'static,
    {
        self.endpoints
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.into(), Arc::new(handler));
    }

    pub fn get(&self, subject: &str) -> Option<Value> {
        self.resources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(subject)
            .cloned()
    }

    /// Makes every request fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, subject: &str) -> usize {
        self.fetches
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Accepted commits, oldest first.
    pub fn commits(&self) -> Vec<Commit> {
        self.commits
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Simulates a change made by another client.
    pub fn notify_change(&self, subject: &str) {
        // No receivers is fine.
        let _ = self.changes.send(subject.to_string());
    }

    async fn round_trip(&self) -> AtomicResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(AtomicError::network(format!(
                "{} is unreachable",
                self.server_url
            )));
        }
        Ok(())
    }

    fn signer_key(&self, signer: &str) -> AtomicResult<String> {
        self.get(signer)
            .and_then(|agent| {
                agent
                    .get(urls::PUBLIC_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| AtomicError::ServerRejected {
                status: 401,
                message: format!("Unknown signer {signer}"),
            })
    }

    fn apply(&self, commit: &Commit, commit_subject: &str) -> AtomicResult<()> {
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let existing = resources.get(&commit.subject);

        let last_commit = existing
            .and_then(|r| r.get(urls::LAST_COMMIT))
            .and_then(Value::as_str);
        if last_commit != commit.previous_commit.as_deref() {
            return Err(AtomicError::ServerRejected {
                status: 409,
                message: format!(
                    "previousCommit of {} is {:?}, commit was based on {:?}",
                    commit.subject, last_commit, commit.previous_commit
                ),
            });
        }

        if commit.destroy {
            if resources.remove(&commit.subject).is_none() {
                return Err(AtomicError::ServerRejected {
                    status: 404,
                    message: format!("{} does not exist", commit.subject),
                });
            }
            return Ok(());
        }

        let mut object = match existing {
            Some(Value::Object(map)) => map.clone(),
            _ => {
                let mut map = Map::new();
                map.insert("@id".into(), Value::String(commit.subject.clone()));
                map
            }
        };
        for (property, value) in &commit.set {
            object.insert(property.clone(), value.clone());
        }
        for property in &commit.remove {
            object.remove(property);
        }
        for (property, values) in &commit.push {
            let entry = object
                .entry(property.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => items.extend(values.iter().cloned()),
                _ => {
                    return Err(AtomicError::ServerRejected {
                        status: 400,
                        message: format!("cannot push to non-array {property}"),
                    })
                }
            }
        }
        object.insert(
            urls::LAST_COMMIT.into(),
            Value::String(commit_subject.to_string()),
        );
        resources.insert(commit.subject.clone(), Value::Object(object));
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn fetch(&self, subject: &str, _agent: Option<&Agent>) -> AtomicResult<Value> {
        *self
            .fetches
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(subject.to_string())
            .or_default() += 1;
        self.round_trip().await?;
        debug!(subject, "serving resource");
        self.get(subject)
            .ok_or_else(|| AtomicError::NotFound(subject.to_string()))
    }

    async fn post_commit(&self, commit_json: &Value) -> AtomicResult<Value> {
        self.round_trip().await?;
        let commit = Commit::from_json_ad(commit_json).map_err(|e| AtomicError::ServerRejected {
            status: 400,
            message: e.to_string(),
        })?;
        let public_key = self.signer_key(&commit.signer)?;
        commit
            .verify(&public_key)
            .map_err(|e| AtomicError::ServerRejected {
                status: 401,
                message: e.to_string(),
            })?;

        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst);
        let commit_subject = format!("{}/commits/{}", self.server_url, seq);
        self.apply(&commit, &commit_subject)?;
        self.commits
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(commit.clone());
        self.notify_change(&commit.subject);

        let mut response = commit_json.as_object().cloned().unwrap_or_default();
        response.insert("@id".into(), Value::String(commit_subject));
        Ok(Value::Object(response))
    }

    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        _agent: Option<&Agent>,
    ) -> AtomicResult<Value> {
        self.round_trip().await?;
        let handler = self
            .endpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| AtomicError::NotFound(url.to_string()))?;
        handler(body)
    }

    fn changes(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.changes.subscribe())
    }
}
