//! The resource store: cache, fetch deduplication, subscriptions, commits and
//! the global error sink.
//!
//! ## Example
//!
//! ```ignore
//! let store = Store::new(StoreConfig::from_env()?, Arc::new(transport))?;
//!
//! // Returns at once; subscribers hear about it when the fetch lands.
//! let doc = store.get_resource_loading("https://example.com/doc1", FetchOpts::default());
//! let _sub = store.subscribe("https://example.com/doc1", |r| println!("{}", r.title(40)));
//!
//! store
//!     .set_value(&doc, urls::NAME, Some(json!("Hello")), SetOpts::commit())
//!     .await?;
//! ```

mod config;
mod error_sink;
mod store;
mod subscriptions;

pub use config::{
    AgentConfig, FetchOpts, NewResourceOpts, SetOpts, StoreConfig, ENV_AGENT_PRIVATE_KEY,
    ENV_AGENT_SUBJECT, ENV_COMMIT_DEBOUNCE_MS, ENV_SERVER_URL,
};
pub use error_sink::{ErrorId, ErrorRecord, ErrorSink};
pub use store::{ErrorListenerId, Store};
pub use subscriptions::{Subscription, SubscriptionId};
