//! Well-known Atomic Data URLs used by the store.

/// Placeholder subject for resources whose `@id` is not known yet.
pub const UNKNOWN_SUBJECT: &str = "unknown-subject";

pub const PUBLIC_AGENT: &str = "https://atomicdata.dev/agents/publicAgent";

// Properties
pub const IS_A: &str = "https://atomicdata.dev/properties/isA";
pub const PARENT: &str = "https://atomicdata.dev/properties/parent";
pub const SHORTNAME: &str = "https://atomicdata.dev/properties/shortname";
pub const NAME: &str = "https://atomicdata.dev/properties/name";
pub const DESCRIPTION: &str = "https://atomicdata.dev/properties/description";
pub const DATATYPE_PROP: &str = "https://atomicdata.dev/properties/datatype";
pub const CLASSTYPE_PROP: &str = "https://atomicdata.dev/properties/classtype";
pub const ALLOWS_ONLY: &str = "https://atomicdata.dev/properties/allowsOnly";
pub const READ: &str = "https://atomicdata.dev/properties/read";
pub const WRITE: &str = "https://atomicdata.dev/properties/write";
pub const LAST_COMMIT: &str = "https://atomicdata.dev/properties/lastCommit";
pub const FILENAME: &str = "https://atomicdata.dev/properties/filename";
pub const PUBLIC_KEY: &str = "https://atomicdata.dev/properties/publicKey";

// Commit properties
pub const SUBJECT: &str = "https://atomicdata.dev/properties/subject";
pub const CREATED_AT: &str = "https://atomicdata.dev/properties/createdAt";
pub const SIGNER: &str = "https://atomicdata.dev/properties/signer";
pub const SET: &str = "https://atomicdata.dev/properties/set";
pub const REMOVE: &str = "https://atomicdata.dev/properties/remove";
pub const PUSH: &str = "https://atomicdata.dev/properties/push";
pub const DESTROY: &str = "https://atomicdata.dev/properties/destroy";
pub const PREVIOUS_COMMIT: &str = "https://atomicdata.dev/properties/previousCommit";
pub const SIGNATURE: &str = "https://atomicdata.dev/properties/signature";

// Classes
pub const CLASS: &str = "https://atomicdata.dev/classes/Class";
pub const PROPERTY: &str = "https://atomicdata.dev/classes/Property";
pub const COMMIT: &str = "https://atomicdata.dev/classes/Commit";
pub const ERROR: &str = "https://atomicdata.dev/classes/Error";
pub const AGENT: &str = "https://atomicdata.dev/classes/Agent";

// Datatypes
pub const STRING: &str = "https://atomicdata.dev/datatypes/string";
pub const MARKDOWN: &str = "https://atomicdata.dev/datatypes/markdown";
pub const SLUG: &str = "https://atomicdata.dev/datatypes/slug";
pub const INTEGER: &str = "https://atomicdata.dev/datatypes/integer";
pub const FLOAT: &str = "https://atomicdata.dev/datatypes/float";
pub const BOOLEAN: &str = "https://atomicdata.dev/datatypes/boolean";
pub const DATE: &str = "https://atomicdata.dev/datatypes/date";
pub const TIMESTAMP: &str = "https://atomicdata.dev/datatypes/timestamp";
pub const ATOMIC_URL: &str = "https://atomicdata.dev/datatypes/atomicURL";
pub const RESOURCE_ARRAY: &str = "https://atomicdata.dev/datatypes/resourceArray";
pub const JSON: &str = "https://atomicdata.dev/datatypes/json";
