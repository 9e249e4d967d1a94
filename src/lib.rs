mod agent;
mod commit;
mod error;
mod parse;
mod resource;
mod schema;
mod store;
mod transport;
pub mod urls;
pub mod value;

pub use agent::{verify_signature, Agent};
pub use commit::{Commit, CommitBuilder, Delta, Operation};
pub use error::{AtomicError, AtomicResult};
pub use parse::{parse_array, parse_object, parse_object_into, Parsed};
pub use resource::{
    ListenerHandle, PendingChange, PendingChanges, PropVals, Resource, ResourceEvent,
    ResourceEventKind,
};
pub use schema::{Datatype, Property};
pub use store::{
    AgentConfig, ErrorId, ErrorListenerId, ErrorRecord, ErrorSink, FetchOpts, NewResourceOpts,
    SetOpts, Store, StoreConfig, Subscription, SubscriptionId, ENV_AGENT_PRIVATE_KEY,
    ENV_AGENT_SUBJECT, ENV_COMMIT_DEBOUNCE_MS, ENV_SERVER_URL,
};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{EndpointHandler, InMemoryTransport, Transport, JSON_AD_MEDIA_TYPE};
