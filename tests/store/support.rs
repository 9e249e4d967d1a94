//! Shared fixtures: an in-memory server seeded with a document and a couple of
//! properties, and a store signed in as a registered agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atomic_store::{urls, Agent, AtomicResult, InMemoryTransport, Store, StoreConfig, Transport};
use serde_json::{json, Value};

pub const SERVER: &str = "https://x";
pub const DOC: &str = "https://x/doc1";
pub const CHILD: &str = "https://x/doc1/child";
pub const TITLE: &str = "https://x/properties/title";
pub const DONE: &str = "https://x/properties/done";
pub const TAGS: &str = "https://x/properties/tags";

pub struct Fixture {
    pub store: Store,
    pub server: Arc<InMemoryTransport>,
    pub agent: Agent,
}

pub fn fixture() -> Fixture {
    fixture_with(InMemoryTransport::new(SERVER))
}

/// Server requests take `latency`; use with a paused clock.
pub fn slow_fixture(latency: Duration) -> Fixture {
    fixture_with(InMemoryTransport::new(SERVER).with_latency(latency))
}

pub fn fixture_with(transport: InMemoryTransport) -> Fixture {
    let server = Arc::new(transport);
    seed(&server);

    let agent = Agent::generate(SERVER);
    server.register_agent(&agent).unwrap();

    let store = Store::new(StoreConfig::new(SERVER), server.clone()).unwrap();
    store.set_agent(Some(agent.clone()));
    Fixture {
        store,
        server,
        agent,
    }
}

/// Applies commits at once but holds the acknowledgement back for `delay`.
pub struct SlowAcks {
    pub server: Arc<InMemoryTransport>,
    pub delay: Duration,
}

#[async_trait]
impl Transport for SlowAcks {
    async fn fetch(&self, subject: &str, agent: Option<&Agent>) -> AtomicResult<Value> {
        self.server.fetch(subject, agent).await
    }

    async fn post_commit(&self, commit: &Value) -> AtomicResult<Value> {
        let ack = self.server.post_commit(commit).await;
        tokio::time::sleep(self.delay).await;
        ack
    }

    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        agent: Option<&Agent>,
    ) -> AtomicResult<Value> {
        self.server.post(url, body, agent).await
    }
}

/// Like [`fixture`], but the store's commits are acknowledged late.
pub fn slow_ack_fixture(delay: Duration) -> Fixture {
    let f = fixture();
    let transport = SlowAcks {
        server: f.server.clone(),
        delay,
    };
    let store = Store::new(StoreConfig::new(SERVER), Arc::new(transport)).unwrap();
    store.set_agent(Some(f.agent.clone()));
    Fixture { store, ..f }
}

fn seed(server: &InMemoryTransport) {
    for (subject, shortname, datatype) in [
        (TITLE, "title", urls::STRING),
        (DONE, "done", urls::BOOLEAN),
        (TAGS, "tags", urls::RESOURCE_ARRAY),
    ] {
        server
            .insert(json!({
                "@id": subject,
                (urls::IS_A): [urls::PROPERTY],
                (urls::SHORTNAME): shortname,
                (urls::DATATYPE_PROP): datatype,
            }))
            .unwrap();
    }
    server
        .insert(json!({
            "@id": DOC,
            TITLE: "Hello",
            DONE: false,
            TAGS: ["https://x/tags/a"],
        }))
        .unwrap();
}

/// Polls `condition` while background tasks run, failing after a second.
/// Sleeps between polls so a paused clock can advance.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("condition was not reached in time");
}
