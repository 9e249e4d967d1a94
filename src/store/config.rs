//! Store configuration and per-call option structs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::{AtomicError, AtomicResult};
use crate::resource::PropVals;

pub const ENV_SERVER_URL: &str = "ATOMIC_SERVER_URL";
pub const ENV_AGENT_SUBJECT: &str = "ATOMIC_AGENT_SUBJECT";
pub const ENV_AGENT_PRIVATE_KEY: &str = "ATOMIC_AGENT_PRIVATE_KEY";
pub const ENV_COMMIT_DEBOUNCE_MS: &str = "ATOMIC_COMMIT_DEBOUNCE_MS";

/// Credentials of the agent the store signs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub subject: String,
    /// Base64 Ed25519 seed.
    pub private_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub server_url: String,
    pub agent: Option<AgentConfig>,
    /// Delay before a `commit: true` edit is saved.
    pub commit_debounce_ms: u64,
    /// Identical errors inside this window are reported once.
    pub error_dedupe_window_ms: u64,
    /// Oldest errors are dropped beyond this many.
    pub max_errors: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            server_url: "http://localhost:9883".to_string(),
            agent: None,
            commit_debounce_ms: 100,
            error_dedupe_window_ms: 500,
            max_errors: 50,
        }
    }
}

impl StoreConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        StoreConfig {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> AtomicResult<Self> {
        serde_json::from_str(json).map_err(|e| AtomicError::Config(e.to_string()))
    }

    /// Reads `ATOMIC_*` environment variables on top of the defaults.
    pub fn from_env() -> AtomicResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`StoreConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> AtomicResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_SERVER_URL) {
            config.server_url = url;
        }
        if let Some(ms) = lookup(ENV_COMMIT_DEBOUNCE_MS) {
            config.commit_debounce_ms = ms.trim().parse().map_err(|_| {
                AtomicError::Config(format!("{ENV_COMMIT_DEBOUNCE_MS} must be a number, got '{ms}'"))
            })?;
        }
        config.agent = match (lookup(ENV_AGENT_SUBJECT), lookup(ENV_AGENT_PRIVATE_KEY)) {
            (Some(subject), Some(private_key)) => Some(AgentConfig {
                subject,
                private_key,
            }),
            (None, None) => None,
            _ => {
                return Err(AtomicError::Config(format!(
                    "{ENV_AGENT_SUBJECT} and {ENV_AGENT_PRIVATE_KEY} must be set together"
                )))
            }
        };
        Ok(config)
    }

    /// Builds the configured agent, if any.
    pub fn build_agent(&self) -> AtomicResult<Option<Agent>> {
        self.agent
            .as_ref()
            .map(|a| Agent::from_private_key(a.subject.clone(), &a.private_key))
            .transpose()
    }

    pub fn commit_debounce(&self) -> Duration {
        Duration::from_millis(self.commit_debounce_ms)
    }

    pub fn error_dedupe_window(&self) -> Duration {
        Duration::from_millis(self.error_dedupe_window_ms)
    }
}

/// Options for `Store::get_resource_loading`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOpts {
    /// Create a local, unsaved resource instead of fetching.
    pub new_resource: bool,
    /// Fetch again even when the subject is cached.
    pub refetch: bool,
}

impl FetchOpts {
    pub fn new_resource() -> Self {
        FetchOpts {
            new_resource: true,
            ..Self::default()
        }
    }

    pub fn refetch() -> Self {
        FetchOpts {
            refetch: true,
            ..Self::default()
        }
    }
}

/// Options for `Store::set_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOpts {
    /// Save after the debounce delay.
    pub commit: bool,
    /// Check the value against its Property before staging.
    pub validate: bool,
    /// Overrides the configured debounce delay.
    pub commit_debounce: Option<Duration>,
}

impl Default for SetOpts {
    fn default() -> Self {
        SetOpts {
            commit: false,
            validate: true,
            commit_debounce: None,
        }
    }
}

impl SetOpts {
    /// Validate, stage and save after the debounce delay.
    pub fn commit() -> Self {
        SetOpts {
            commit: true,
            ..Self::default()
        }
    }

    pub fn debounce(mut self, delay: Duration) -> Self {
        self.commit_debounce = Some(delay);
        self
    }

    pub fn unvalidated(mut self) -> Self {
        self.validate = false;
        self
    }
}

/// Options for `Store::new_resource`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewResourceOpts {
    /// Explicit subject. Generated under `parent` (or the server) when absent.
    pub subject: Option<String>,
    pub parent: Option<String>,
    /// Classes written to `isA`.
    pub is_a: Vec<String>,
    /// Extra properties staged on the new resource.
    pub propvals: PropVals,
}

impl NewResourceOpts {
    pub fn with_class(class: impl Into<String>) -> Self {
        NewResourceOpts {
            is_a: vec![class.into()],
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn propval(mut self, property: impl Into<String>, value: serde_json::Value) -> Self {
        self.propvals.insert(property.into(), value);
        self
    }
}
