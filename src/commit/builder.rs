use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::commit::Commit;
use crate::agent::Agent;
use crate::error::{AtomicError, AtomicResult};
use crate::resource::{PendingChange, PendingChanges};

/// Collects changes for one resource and signs them into a [`Commit`].
///
/// Changes are kept in property order so two builders fed the same edits in
/// any order sign identical bytes.
#[derive(Debug, Clone, Default)]
pub struct CommitBuilder {
    subject: String,
    set: BTreeMap<String, Value>,
    remove: BTreeSet<String>,
    push: BTreeMap<String, Vec<Value>>,
    destroy: bool,
    previous_commit: Option<String>,
}

impl CommitBuilder {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Starts a builder from a resource's pending changes.
    pub fn from_pending(subject: impl Into<String>, pending: &PendingChanges) -> Self {
        pending
            .iter()
            .fold(Self::new(subject), |builder, (property, change)| match change {
                PendingChange::Set(value) => builder.set(property.clone(), value.clone()),
                PendingChange::Remove => builder.remove(property.clone()),
                PendingChange::Push(values) => builder.push(property.clone(), values.clone()),
            })
    }

    pub fn set(mut self, property: impl Into<String>, value: Value) -> Self {
        let property = property.into();
        self.remove.remove(&property);
        self.push.remove(&property);
        self.set.insert(property, value);
        self
    }

    pub fn remove(mut self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.set.remove(&property);
        self.push.remove(&property);
        self.remove.insert(property);
        self
    }

    pub fn push(mut self, property: impl Into<String>, values: Vec<Value>) -> Self {
        self.push.entry(property.into()).or_default().extend(values);
        self
    }

    pub fn destroy(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }

    pub fn previous_commit(mut self, previous: Option<String>) -> Self {
        self.previous_commit = previous;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty() && self.push.is_empty() && !self.destroy
    }

    /// Signs the collected changes. Anonymous sessions cannot commit, so a
    /// missing agent is a [`AtomicError::Signing`] failure.
    pub fn sign(self, agent: Option<&Agent>, created_at: i64) -> AtomicResult<Commit> {
        let agent = agent.ok_or_else(|| {
            AtomicError::Signing(format!(
                "no agent is set, cannot sign a commit for {}",
                self.subject
            ))
        })?;

        let mut commit = Commit {
            subject: self.subject,
            created_at,
            signer: agent.subject().to_string(),
            set: self.set,
            remove: self.remove.into_iter().collect(),
            push: self.push,
            destroy: self.destroy,
            previous_commit: self.previous_commit,
            signature: None,
        };
        let signature = agent.sign(commit.serialize_for_signing()?.as_bytes());
        commit.signature = Some(signature);
        Ok(commit)
    }
}
