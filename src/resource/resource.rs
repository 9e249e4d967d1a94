use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use tokio::sync::watch;

use super::events::{EventEmitter, ListenerHandle, ResourceEvent, ResourceEventKind};
use super::pending::{settle, PendingChange, PendingChanges};
use crate::error::{AtomicError, AtomicResult};
use crate::store::Store;
use crate::urls;
use crate::value::{truncate_url, val_to_string, val_to_subjects};

/// Property URL to JSON value.
pub type PropVals = BTreeMap<String, Value>;

struct ResourceState {
    subject: String,
    /// Last state confirmed by the server.
    propvals: PropVals,
    pending: PendingChanges,
    loading: bool,
    error: Option<AtomicError>,
    new: bool,
    saving: Option<InFlightSave>,
}

/// Changes sent by a save that has not been acknowledged yet.
struct InFlightSave {
    sent: PendingChanges,
    /// `lastCommit` the commit was built on.
    base: Option<String>,
    /// A refetch already showed the server state with these changes applied.
    included: bool,
}

fn last_commit_of(propvals: &PropVals) -> Option<String> {
    propvals
        .get(urls::LAST_COMMIT)
        .and_then(Value::as_str)
        .map(str::to_string)
}

struct ResourceInner {
    state: RwLock<ResourceState>,
    events: EventEmitter,
    loading_tx: watch::Sender<bool>,
}

/// A shared handle to one Atomic Data resource.
///
/// Cloning is cheap and yields the same instance: every clone observes and
/// performs the same mutations. The store hands out one instance per subject.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Resource")
            .field("subject", &state.subject)
            .field("propvals", &state.propvals)
            .field("pending", &state.pending)
            .field("loading", &state.loading)
            .field("error", &state.error)
            .field("new", &state.new)
            .finish()
    }
}

impl Resource {
    fn with_state(subject: String, loading: bool, new: bool) -> Self {
        let (loading_tx, _) = watch::channel(loading);
        Resource {
            inner: Arc::new(ResourceInner {
                state: RwLock::new(ResourceState {
                    subject,
                    propvals: PropVals::new(),
                    pending: PendingChanges::new(),
                    loading,
                    error: None,
                    new,
                    saving: None,
                }),
                events: EventEmitter::new(),
                loading_tx,
            }),
        }
    }

    /// A ready resource with no properties.
    pub fn new(subject: impl Into<String>) -> Self {
        Self::with_state(subject.into(), false, false)
    }

    /// A placeholder that stays `loading` until a fetch settles it.
    pub fn new_loading(subject: impl Into<String>) -> Self {
        Self::with_state(subject.into(), true, false)
    }

    /// A client-constructed resource that has never been saved.
    pub fn new_local(subject: impl Into<String>) -> Self {
        Self::with_state(subject.into(), false, true)
    }

    fn read(&self) -> RwLockReadGuard<'_, ResourceState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResourceState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True when both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn subject(&self) -> String {
        self.read().subject.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    pub fn error(&self) -> Option<AtomicError> {
        self.read().error.clone()
    }

    pub fn is_new(&self) -> bool {
        self.read().new
    }

    /// Ready means neither loading nor errored.
    pub fn is_ready(&self) -> bool {
        let state = self.read();
        !state.loading && state.error.is_none()
    }

    /// Current value of a property. Pending edits win over the synced value.
    pub fn get(&self, property: &str) -> Option<Value> {
        let state = self.read();
        match state.pending.get(property) {
            Some(change) => change.effective(state.propvals.get(property)),
            None => state.propvals.get(property).cloned(),
        }
    }

    /// Effective property map: committed values overlaid with pending edits.
    pub fn props(&self) -> PropVals {
        let state = self.read();
        let mut props = state.propvals.clone();
        for (property, change) in &state.pending {
            change.apply_to(property, &mut props);
        }
        props
    }

    /// The last state confirmed by the server, ignoring pending edits.
    pub fn committed_props(&self) -> PropVals {
        self.read().propvals.clone()
    }

    pub fn pending_changes(&self) -> PendingChanges {
        self.read().pending.clone()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.read().pending.is_empty()
    }

    pub fn classes(&self) -> Vec<String> {
        self.get(urls::IS_A)
            .and_then(|v| val_to_subjects(&v).ok())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().iter().any(|c| c == class)
    }

    /// Best human-readable name: name, shortname, filename, then the subject.
    pub fn title(&self, truncate_length: usize) -> String {
        if self.is_loading() {
            return "...".to_string();
        }
        [urls::NAME, urls::SHORTNAME, urls::FILENAME]
            .iter()
            .find_map(|prop| self.get(prop).and_then(|v| val_to_string(&v).ok()))
            .unwrap_or_else(|| truncate_url(&self.subject(), truncate_length))
    }

    /// Serializes the effective state as a JSON-AD object.
    pub fn to_json_ad(&self) -> Value {
        let mut object = Map::new();
        object.insert("@id".to_string(), Value::String(self.subject()));
        for (property, value) in self.props() {
            object.insert(property, value);
        }
        Value::Object(object)
    }

    /// Registers a listener. `LocalChange` listeners run synchronously inside
    /// the staging call, before any network activity.
    pub fn on<F>(&self, kind: ResourceEventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn listener_count(&self, kind: ResourceEventKind) -> usize {
        self.inner.events.listener_count(kind)
    }

    fn emit(&self, event: ResourceEvent) {
        self.inner.events.emit(&event);
    }

    /// Stages a value without validating it against its Property.
    pub fn set_unsafe(&self, property: impl Into<String>, value: Value) {
        let property = property.into();
        self.write()
            .pending
            .insert(property.clone(), PendingChange::Set(value.clone()));
        self.emit(ResourceEvent::LocalChange {
            property,
            value: Some(value),
        });
    }

    /// Validates (when asked) and stages a value.
    ///
    /// Validation resolves the Property through the store, which may fetch it.
    /// On failure nothing is staged.
    pub async fn set(
        &self,
        store: &Store,
        property: &str,
        value: Value,
        validate: bool,
    ) -> AtomicResult<()> {
        if validate {
            let prop = store.get_property(property).await?;
            prop.validate(&value)?;
        }
        self.set_unsafe(property, value);
        Ok(())
    }

    /// Stages removal of a property.
    pub fn remove(&self, property: impl Into<String>) {
        let property = property.into();
        self.write()
            .pending
            .insert(property.clone(), PendingChange::Remove);
        self.emit(ResourceEvent::LocalChange {
            property,
            value: None,
        });
    }

    /// Stages an append to an array property, creating it when absent.
    pub fn push(&self, property: impl Into<String>, values: Vec<Value>) -> AtomicResult<()> {
        let property = property.into();
        let effective = {
            let mut state = self.write();
            let current = match state.pending.get(&property) {
                Some(change) => change.effective(state.propvals.get(&property)),
                None => state.propvals.get(&property).cloned(),
            };
            if let Some(existing) = current.as_ref().filter(|v| !v.is_array()) {
                return Err(AtomicError::NotAResourceArray(format!(
                    "cannot push to {property}, it holds {existing}"
                )));
            }

            let next = match state.pending.remove(&property) {
                Some(PendingChange::Set(Value::Array(mut items))) => {
                    items.extend(values);
                    PendingChange::Set(Value::Array(items))
                }
                Some(PendingChange::Push(mut appended)) => {
                    appended.extend(values);
                    PendingChange::Push(appended)
                }
                Some(PendingChange::Remove) => PendingChange::Set(Value::Array(values)),
                _ => PendingChange::Push(values),
            };
            let effective = next.effective(state.propvals.get(&property));
            state.pending.insert(property.clone(), next);
            effective
        };
        self.emit(ResourceEvent::LocalChange {
            property,
            value: effective,
        });
        Ok(())
    }

    /// Drops every pending edit, restoring the synced values.
    pub fn discard_changes(&self) {
        let reverted: Vec<(String, Option<Value>)> = {
            let mut state = self.write();
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_keys()
                .map(|property| {
                    let value = state.propvals.get(&property).cloned();
                    (property, value)
                })
                .collect()
        };
        for (property, value) in reverted {
            self.emit(ResourceEvent::LocalChange { property, value });
        }
    }

    /// Signs and sends the pending changes as one commit.
    pub async fn save(&self, store: &Store) -> AtomicResult<()> {
        store.save(self).await
    }

    /// Asks the server to delete this resource. The store evicts it only
    /// after the server confirms.
    pub async fn destroy(&self, store: &Store) -> AtomicResult<()> {
        store.destroy(self).await
    }

    /// Local authorization hint: does `agent` have write rights here or on an
    /// ancestor? Walks `parent` links, fetching ancestors as needed.
    pub async fn can_write(
        &self,
        store: &Store,
        agent: &str,
    ) -> AtomicResult<(bool, Option<String>)> {
        if self.is_new() {
            return Ok((true, None));
        }

        let mut current = self.clone();
        let mut visited = HashSet::new();
        loop {
            let subject = current.subject();
            if !visited.insert(subject.clone()) {
                return Ok((false, Some(format!("Cycle in parents of {subject}"))));
            }

            let writers = current
                .get(urls::WRITE)
                .and_then(|v| val_to_subjects(&v).ok())
                .unwrap_or_default();
            if writers.iter().any(|w| w == agent || w == urls::PUBLIC_AGENT) {
                return Ok((true, None));
            }

            let Some(parent) = current.get(urls::PARENT).and_then(|v| v.as_str().map(str::to_string))
            else {
                return Ok((
                    false,
                    Some(format!("No write right or parent in {subject}")),
                ));
            };

            let parent_resource = store.get_resource(&parent).await;
            if let Some(err) = parent_resource.error() {
                return Ok((
                    false,
                    Some(format!("Could not fetch parent {parent}: {err}")),
                ));
            }
            current = parent_resource;
        }
    }

    /// Resolves once the resource is no longer loading.
    pub async fn wait_until_loaded(&self) {
        let mut rx = self.inner.loading_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|loading| !*loading).await;
    }

    pub(crate) fn set_subject(&self, subject: impl Into<String>) {
        self.write().subject = subject.into();
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        let changed = {
            let mut state = self.write();
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        };
        self.inner.loading_tx.send_replace(loading);
        if changed {
            self.emit(ResourceEvent::LoadingChange(loading));
        }
    }

    pub(crate) fn set_error(&self, error: AtomicError) {
        self.write().error = Some(error);
    }

    /// Marks the resource as failed and no longer loading.
    pub(crate) fn fail(&self, error: AtomicError) {
        self.set_error(error);
        self.set_loading(false);
    }

    /// Writes a server-confirmed value, bypassing pending tracking.
    pub(crate) fn insert_committed(&self, property: impl Into<String>, value: Value) {
        self.write().propvals.insert(property.into(), value);
    }

    /// Takes the server state of `fetched`, keeping this instance's pending edits.
    pub(crate) fn merge_fetched(&self, fetched: &Resource) {
        if self.ptr_eq(fetched) {
            return;
        }
        let (propvals, error) = {
            let other = fetched.read();
            (other.propvals.clone(), other.error.clone())
        };
        {
            let mut state = self.write();
            let state = &mut *state;
            state.propvals = propvals;
            state.error = error;
            state.new = false;
            // The server moved past the commit an unacknowledged save built on,
            // so the fetched values already hold what it sent.
            if let Some(saving) = state.saving.as_mut() {
                if !saving.included && last_commit_of(&state.propvals) != saving.base {
                    settle(&mut state.pending, &saving.sent);
                    saving.included = true;
                }
            }
        }
        self.set_loading(false);
    }

    /// Snapshots the pending changes for a save. Returns them with the
    /// `lastCommit` they build on.
    pub(crate) fn begin_save(&self) -> (PendingChanges, Option<String>) {
        let mut state = self.write();
        let sent = state.pending.clone();
        let base = last_commit_of(&state.propvals);
        state.saving = Some(InFlightSave {
            sent: sent.clone(),
            base: base.clone(),
            included: false,
        });
        (sent, base)
    }

    /// Ends a failed save. Changes a refetch had settled are staged again,
    /// under any edits made since.
    pub(crate) fn abort_save(&self) {
        let mut state = self.write();
        let state = &mut *state;
        let Some(saving) = state.saving.take() else {
            return;
        };
        if !saving.included {
            return;
        }
        for (property, change) in saving.sent {
            let restored = match (change, state.pending.remove(&property)) {
                (PendingChange::Push(mut sent), Some(PendingChange::Push(later))) => {
                    sent.extend(later);
                    PendingChange::Push(sent)
                }
                (_, Some(later)) => later,
                (change, None) => change,
            };
            state.pending.insert(property, restored);
        }
    }

    /// Folds an acknowledged commit into the committed layer.
    pub(crate) fn apply_commit_ack(&self, sent: &PendingChanges, commit_subject: Option<String>) {
        {
            let mut state = self.write();
            let state = &mut *state;
            let included = state.saving.take().is_some_and(|saving| saving.included);
            let applied =
                commit_subject.is_some() && last_commit_of(&state.propvals) == commit_subject;
            if !included && !applied {
                for (property, change) in sent {
                    change.apply_to(property, &mut state.propvals);
                }
                if let Some(commit) = commit_subject {
                    state.propvals.insert(urls::LAST_COMMIT.to_string(), Value::String(commit));
                }
            }
            if !included {
                settle(&mut state.pending, sent);
            }
            state.new = false;
            state.error = None;
        }
        self.emit(ResourceEvent::Saved);
    }
}
