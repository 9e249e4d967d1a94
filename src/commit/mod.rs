//! Commits - signed, canonically ordered change records.
//!
//! ## Example
//!
//! ```ignore
//! let commit = CommitBuilder::new("https://example.com/doc1")
//!     .set(urls::NAME, json!("Hello"))
//!     .remove(urls::DESCRIPTION)
//!     .previous_commit(last_commit)
//!     .sign(store.agent().as_ref(), Utc::now().timestamp_millis())?;
//!
//! transport.post_commit(&commit.to_json_ad()?).await?;
//! ```

mod builder;
mod commit;

pub use builder::CommitBuilder;
pub use commit::{Commit, Delta, Operation};
