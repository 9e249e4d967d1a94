use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{FetchOpts, NewResourceOpts, SetOpts, StoreConfig};
use super::error_sink::{ErrorRecord, ErrorSink};
use super::subscriptions::{Subscription, Subscriptions};
use crate::agent::Agent;
use crate::commit::CommitBuilder;
use crate::error::{AtomicError, AtomicResult};
use crate::parse::parse_object;
use crate::resource::{PendingChanges, Resource};
use crate::schema::Property;
use crate::transport::Transport;
use crate::urls;

pub type ErrorListenerId = u64;

type ErrorListener = Arc<dyn Fn(&AtomicError) + Send + Sync>;

struct Debounced {
    generation: u64,
    handle: JoinHandle<()>,
}

struct StoreInner {
    config: StoreConfig,
    transport: Arc<dyn Transport>,
    resources: RwLock<HashMap<String, Resource>>,
    subscriptions: RwLock<Subscriptions>,
    agent: RwLock<Option<Agent>>,
    errors: Mutex<ErrorSink>,
    error_listeners: RwLock<Vec<(ErrorListenerId, ErrorListener)>>,
    in_flight: Mutex<HashSet<String>>,
    debounced: Mutex<HashMap<String, Debounced>>,
    save_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    change_listener: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    /// Bumped by `clear`; fetches started in an older epoch are discarded.
    epoch: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cache of resources keyed by subject, and the gateway to the server.
///
/// Construct one per application (or per test) and pass clones around; every
/// clone shares the same cache. For any subject the store hands out exactly
/// one [`Resource`] instance, mutated in place by fetches and commits.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("server_url", &self.inner.config.server_url)
            .field("resources", &read(&self.inner.resources).len())
            .field("agent", &self.agent().map(|a| a.subject().to_string()))
            .finish()
    }
}

impl Store {
    /// Builds a store on `transport`, signing with the configured agent if any.
    pub fn new(config: StoreConfig, transport: Arc<dyn Transport>) -> AtomicResult<Self> {
        let agent = config.build_agent()?;
        let errors = ErrorSink::new(config.max_errors, config.error_dedupe_window());
        Ok(Store {
            inner: Arc::new(StoreInner {
                config,
                transport,
                resources: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(Subscriptions::default()),
                agent: RwLock::new(agent),
                errors: Mutex::new(errors),
                error_listeners: RwLock::new(Vec::new()),
                in_flight: Mutex::new(HashSet::new()),
                debounced: Mutex::new(HashMap::new()),
                save_locks: Mutex::new(HashMap::new()),
                change_listener: Mutex::new(None),
                next_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        })
    }

    /// A store talking HTTP to `config.server_url`.
    #[cfg(feature = "http")]
    pub fn connect(config: StoreConfig) -> AtomicResult<Self> {
        let transport = crate::transport::HttpTransport::new(config.server_url.clone());
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn server_url(&self) -> &str {
        self.inner.config.server_url.trim_end_matches('/')
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // Agent

    /// Sets or clears the agent that signs commits and requests.
    pub fn set_agent(&self, agent: Option<Agent>) {
        info!(agent = ?agent.as_ref().map(Agent::subject), "agent changed");
        *write(&self.inner.agent) = agent;
    }

    pub fn agent(&self) -> Option<Agent> {
        read(&self.inner.agent).clone()
    }

    // Cache

    /// Returns the cached resource, or a loading placeholder while a background
    /// fetch runs. Never waits on the network.
    ///
    /// Concurrent calls for an uncached subject share one placeholder and one
    /// fetch.
    pub fn get_resource_loading(&self, subject: &str, opts: FetchOpts) -> Resource {
        let (resource, needs_fetch) = {
            let mut resources = write(&self.inner.resources);
            match resources.get(subject) {
                Some(existing) => (
                    existing.clone(),
                    opts.refetch && !opts.new_resource && !existing.is_new(),
                ),
                None if opts.new_resource => {
                    let resource = Resource::new_local(subject);
                    resources.insert(subject.to_string(), resource.clone());
                    (resource, false)
                }
                None => {
                    let resource = Resource::new_loading(subject);
                    resources.insert(subject.to_string(), resource.clone());
                    (resource, true)
                }
            }
        };
        if needs_fetch {
            self.schedule_fetch(subject);
        }
        resource
    }

    /// Resolves once the resource has loaded or failed. Failures are on
    /// [`Resource::error`].
    pub async fn get_resource(&self, subject: &str) -> Resource {
        let resource = self.get_resource_loading(subject, FetchOpts::default());
        resource.wait_until_loaded().await;
        resource
    }

    /// The cached instance, without fetching.
    pub fn get_cached(&self, subject: &str) -> Option<Resource> {
        read(&self.inner.resources).get(subject).cloned()
    }

    /// Snapshot of every cached resource.
    pub fn resources(&self) -> Vec<Resource> {
        read(&self.inner.resources).values().cloned().collect()
    }

    /// Merges a resource into the cache and notifies its subscribers.
    ///
    /// If the subject is cached, the cached instance takes the new committed
    /// state and keeps its pending edits. Returns the cached instance.
    pub fn add_resource(&self, resource: Resource) -> Resource {
        let subject = resource.subject();
        let cached = write(&self.inner.resources)
            .entry(subject)
            .or_insert_with(|| resource.clone())
            .clone();
        cached.merge_fetched(&resource);
        self.notify(&cached);
        cached
    }

    pub fn remove_resource(&self, subject: &str) -> Option<Resource> {
        self.cancel_debounced_save(subject);
        lock(&self.inner.save_locks).remove(subject);
        let removed = write(&self.inner.resources).remove(subject);
        if removed.is_some() {
            debug!(subject, "evicted resource");
        }
        removed
    }

    /// Drops every cached resource, subscription, queued save and error.
    pub fn clear(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        for (_, debounced) in lock(&self.inner.debounced).drain() {
            debounced.handle.abort();
        }
        if let Some(listener) = lock(&self.inner.change_listener).take() {
            listener.abort();
        }
        write(&self.inner.resources).clear();
        write(&self.inner.subscriptions).clear();
        lock(&self.inner.errors).clear();
        lock(&self.inner.in_flight).clear();
        lock(&self.inner.save_locks).clear();
        debug!("store cleared");
    }

    /// A fresh subject under `parent`, or under the server when absent.
    pub fn create_subject(&self, parent: Option<&str>) -> String {
        let base = parent.unwrap_or_else(|| self.server_url());
        format!("{}/{}", base.trim_end_matches('/'), Uuid::new_v4().simple())
    }

    // Fetching

    fn schedule_fetch(&self, subject: &str) {
        if !lock(&self.inner.in_flight).insert(subject.to_string()) {
            debug!(subject, "fetch already in flight");
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.clone();
                let subject = subject.to_string();
                let epoch = self.epoch();
                runtime.spawn(async move {
                    // Failures are recorded on the resource and in the sink.
                    let _ = store.fetch_in_epoch(&subject, epoch).await;
                });
            }
            Err(_) => {
                lock(&self.inner.in_flight).remove(subject);
                let err = AtomicError::network(format!(
                    "cannot fetch {subject} outside of a tokio runtime"
                ));
                self.fail_fetch(subject, err);
            }
        }
    }

    /// Fetches `subject`, parses it and merges every discovered resource into
    /// the cache.
    ///
    /// On failure the cached resource is marked with the error, its
    /// subscribers are notified, and network failures are reported to the
    /// error sink.
    pub async fn fetch_resource_from_server(&self, subject: &str) -> AtomicResult<Resource> {
        self.fetch_in_epoch(subject, self.epoch()).await
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    async fn fetch_in_epoch(&self, subject: &str, epoch: u64) -> AtomicResult<Resource> {
        debug!(subject, "fetching");
        let placeholder = self.get_cached(subject);
        let agent = self.agent();
        let result = match self.inner.transport.fetch(subject, agent.as_ref()).await {
            Ok(json) => parse_object(&json, Some(subject)),
            Err(err) => Err(err),
        };

        if self.epoch() != epoch {
            debug!(subject, "store cleared during fetch, dropping result");
            let err = AtomicError::network(format!("store was cleared while fetching {subject}"));
            if let Some(orphan) = placeholder {
                if orphan.is_loading() {
                    orphan.fail(err.clone());
                }
            }
            return Err(err);
        }
        lock(&self.inner.in_flight).remove(subject);

        match result {
            Ok(parsed) => {
                let mut root = None;
                for resource in parsed.all {
                    let cached = self.add_resource(resource);
                    if root.is_none() {
                        root = Some(cached);
                    }
                }
                root.ok_or_else(|| AtomicError::NotFound(subject.to_string()))
            }
            Err(err) => {
                self.fail_fetch(subject, err.clone());
                Err(err)
            }
        }
    }

    fn fail_fetch(&self, subject: &str, err: AtomicError) {
        warn!(subject, error = %err, "fetch failed");
        let resource = write(&self.inner.resources)
            .entry(subject.to_string())
            .or_insert_with(|| Resource::new_loading(subject))
            .clone();
        resource.fail(err.clone());
        self.notify(&resource);
        if matches!(err, AtomicError::Network(_)) {
            self.notify_error(err);
        }
    }

    /// Resolves `subject` as a typed Property.
    pub async fn get_property(&self, subject: &str) -> AtomicResult<Property> {
        let resource = self.get_resource(subject).await;
        Property::from_resource(&resource)
    }

    /// Authenticated POST; the JSON-AD answer is parsed and cached like a fetch.
    pub async fn post_to_server(&self, url: &str, body: Option<Value>) -> AtomicResult<Resource> {
        let agent = self.agent();
        let json = self
            .inner
            .transport
            .post(url, body.as_ref(), agent.as_ref())
            .await?;
        let parsed = parse_object(&json, None)?;
        if parsed.root.subject() == urls::UNKNOWN_SUBJECT {
            return Ok(parsed.root);
        }
        let root_subject = parsed.root.subject();
        for resource in parsed.all {
            self.add_resource(resource);
        }
        self.get_cached(&root_subject)
            .ok_or(AtomicError::NotFound(root_subject))
    }

    /// Turns pushed change notifications into refetches of cached subjects.
    ///
    /// Does nothing when the transport has no change stream. Calling it again
    /// replaces the previous listener.
    pub fn listen_for_changes(&self) {
        let Some(mut changes) = self.inner.transport.changes() else {
            debug!("transport does not push changes");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("change listener needs a tokio runtime");
            return;
        };
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(subject) => {
                        let Some(inner) = store.upgrade() else {
                            break;
                        };
                        let store = Store { inner };
                        if store.get_cached(&subject).is_some() {
                            debug!(%subject, "changed on server, refetching");
                            store.schedule_fetch(&subject);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed change notifications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = lock(&self.inner.change_listener).replace(handle) {
            previous.abort();
        }
    }

    // Subscriptions

    /// Registers `callback` for changes to `subject`. Does not fetch.
    pub fn subscribe<F>(&self, subject: &str, callback: F) -> Subscription
    where
        F: Fn(&Resource) + Send + Sync + 'static,
    {
        write(&self.inner.subscriptions).add(subject, Arc::new(callback))
    }

    /// Stops delivery to one subscriber. In-flight fetches keep running.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        write(&self.inner.subscriptions).remove(subscription)
    }

    pub fn unsubscribe_all(&self, subject: &str) -> usize {
        write(&self.inner.subscriptions).remove_all(subject)
    }

    pub fn subscriber_count(&self, subject: &str) -> usize {
        read(&self.inner.subscriptions).count(subject)
    }

    /// Calls every subscriber of the resource's subject once, in
    /// registration order.
    pub fn notify(&self, resource: &Resource) {
        let callbacks = read(&self.inner.subscriptions).callbacks(&resource.subject());
        for callback in callbacks {
            callback(resource);
        }
    }

    // Errors

    /// Reports an error to the global sink. Identical errors inside the
    /// dedupe window reach listeners once.
    pub fn notify_error(&self, error: AtomicError) {
        warn!(error = %error, "error reported");
        let fresh = lock(&self.inner.errors)
            .push(error.clone(), tokio::time::Instant::now())
            .is_some();
        if !fresh {
            return;
        }
        let listeners: Vec<ErrorListener> = read(&self.inner.error_listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&error);
        }
    }

    pub fn on_error<F>(&self, listener: F) -> ErrorListenerId
    where
        F: Fn(&AtomicError) + Send + Sync + 'static,
    {
        let id = self.next_id();
        write(&self.inner.error_listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn off_error(&self, id: ErrorListenerId) {
        write(&self.inner.error_listeners).retain(|(existing, _)| *existing != id);
    }

    /// Snapshot of the error sink, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        lock(&self.inner.errors).records()
    }

    // Creating and editing

    /// Creates an unsaved resource and caches it. Nothing is sent until it is
    /// saved.
    pub fn new_resource(&self, opts: NewResourceOpts) -> AtomicResult<Resource> {
        let subject = match opts.subject {
            Some(subject) => subject,
            None => self.create_subject(opts.parent.as_deref()),
        };

        let resource = Resource::new_local(subject.as_str());
        if !opts.is_a.is_empty() {
            resource.set_unsafe(
                urls::IS_A,
                Value::Array(opts.is_a.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(parent) = opts.parent {
            resource.set_unsafe(urls::PARENT, Value::String(parent));
        }
        for (property, value) in opts.propvals {
            resource.set_unsafe(property, value);
        }

        {
            let mut resources = write(&self.inner.resources);
            if resources.contains_key(&subject) {
                return Err(AtomicError::validation(format!(
                    "a resource with subject {subject} already exists"
                )));
            }
            resources.insert(subject.clone(), resource.clone());
        }
        debug!(%subject, "created local resource");
        self.notify(&resource);
        Ok(resource)
    }

    /// Stages a value (or a removal, for `None`) and optionally schedules a
    /// debounced save.
    ///
    /// Failures reject the call and are reported to the error sink.
    pub async fn set_value(
        &self,
        resource: &Resource,
        property: &str,
        value: Option<Value>,
        opts: SetOpts,
    ) -> AtomicResult<()> {
        let staged = match value {
            Some(value) => resource.set(self, property, value, opts.validate).await,
            None => {
                resource.remove(property);
                Ok(())
            }
        };
        if let Err(err) = staged {
            self.notify_error(err.clone());
            return Err(err);
        }

        if opts.commit {
            let delay = opts
                .commit_debounce
                .unwrap_or_else(|| self.inner.config.commit_debounce());
            self.schedule_save(resource, delay);
        }
        Ok(())
    }

    /// Saves `resource` after `delay`, replacing any save already waiting for
    /// the same subject.
    pub fn schedule_save(&self, resource: &Resource, delay: Duration) {
        let subject = resource.subject();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.notify_error(AtomicError::network(format!(
                "cannot schedule a save of {subject} outside of a tokio runtime"
            )));
            return;
        };
        let generation = self.next_id();
        let store = self.clone();
        let target = resource.clone();
        let key = subject.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut debounced = lock(&store.inner.debounced);
                if debounced.get(&key).map(|d| d.generation) == Some(generation) {
                    debounced.remove(&key);
                }
            }
            // Failures already went to the error sink.
            let _ = store.save(&target).await;
        });

        let previous = lock(&self.inner.debounced).insert(subject, Debounced { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn cancel_debounced_save(&self, subject: &str) {
        if let Some(debounced) = lock(&self.inner.debounced).remove(subject) {
            debounced.handle.abort();
        }
    }

    fn save_lock(&self, subject: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.inner.save_locks)
                .entry(subject.to_string())
                .or_default(),
        )
    }

    /// Signs the resource's pending changes into one commit and sends it.
    ///
    /// Saves of the same subject run one at a time; a save with nothing
    /// pending is a no-op. Failures reject the call and reach the error sink.
    pub async fn save(&self, resource: &Resource) -> AtomicResult<()> {
        let subject = resource.subject();
        let guard = self.save_lock(&subject);
        let _serialized = guard.lock().await;

        if !resource.has_pending_changes() {
            debug!(%subject, "nothing to save");
            return Ok(());
        }

        let (pending, base) = resource.begin_save();
        let result = self.send_commit(resource, &subject, &pending, base).await;
        match &result {
            Ok(()) => {
                info!(%subject, changes = pending.len(), "saved");
                self.notify(resource);
            }
            Err(err) => {
                resource.abort_save();
                self.notify_error(err.clone());
            }
        }
        result
    }

    async fn send_commit(
        &self,
        resource: &Resource,
        subject: &str,
        pending: &PendingChanges,
        previous_commit: Option<String>,
    ) -> AtomicResult<()> {
        let commit = CommitBuilder::from_pending(subject, pending)
            .previous_commit(previous_commit)
            .sign(self.agent().as_ref(), Utc::now().timestamp_millis())?;
        let response = self.inner.transport.post_commit(&commit.to_json_ad()?).await?;
        let commit_subject = response
            .get("@id")
            .and_then(Value::as_str)
            .map(str::to_string);
        resource.apply_commit_ack(pending, commit_subject);
        Ok(())
    }

    /// Deletes the resource on the server, then evicts it from the cache.
    /// Unsaved resources are only evicted.
    pub async fn destroy(&self, resource: &Resource) -> AtomicResult<()> {
        let subject = resource.subject();
        if resource.is_new() {
            self.remove_resource(&subject);
            return Ok(());
        }

        let result = async {
            let commit = CommitBuilder::new(subject.as_str())
                .destroy(true)
                .previous_commit(last_commit(resource))
                .sign(self.agent().as_ref(), Utc::now().timestamp_millis())?;
            self.inner
                .transport
                .post_commit(&commit.to_json_ad()?)
                .await
                .map(|_| ())
        }
        .await;

        match result {
            Ok(()) => {
                info!(%subject, "destroyed");
                self.remove_resource(&subject);
                Ok(())
            }
            Err(err) => {
                self.notify_error(err.clone());
                Err(err)
            }
        }
    }
}

fn last_commit(resource: &Resource) -> Option<String> {
    resource
        .committed_props()
        .get(urls::LAST_COMMIT)
        .and_then(Value::as_str)
        .map(str::to_string)
}
