use std::collections::HashMap;
use std::sync::Arc;

use crate::resource::Resource;

pub type SubscriptionId = u64;

pub(crate) type SubscriberFn = Arc<dyn Fn(&Resource) + Send + Sync>;

/// Returned by `Store::subscribe`; pass it to `Store::unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub subject: String,
    pub id: SubscriptionId,
}

/// Per-subject callbacks, kept in registration order.
#[derive(Default)]
pub(crate) struct Subscriptions {
    by_subject: HashMap<String, Vec<(SubscriptionId, SubscriberFn)>>,
    next_id: SubscriptionId,
}

impl Subscriptions {
    pub fn add(&mut self, subject: &str, callback: SubscriberFn) -> Subscription {
        self.next_id += 1;
        let id = self.next_id;
        self.by_subject
            .entry(subject.to_string())
            .or_default()
            .push((id, callback));
        Subscription {
            subject: subject.to_string(),
            id,
        }
    }

    /// Returns false when the subscription was already gone.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let Some(callbacks) = self.by_subject.get_mut(&subscription.subject) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != subscription.id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            self.by_subject.remove(&subscription.subject);
        }
        removed
    }

    pub fn remove_all(&mut self, subject: &str) -> usize {
        self.by_subject.remove(subject).map_or(0, |c| c.len())
    }

    /// Callbacks to run for `subject`, cloned so none are called under a lock.
    pub fn callbacks(&self, subject: &str) -> Vec<SubscriberFn> {
        self.by_subject
            .get(subject)
            .map(|c| c.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, subject: &str) -> usize {
        self.by_subject.get(subject).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.by_subject.clear();
    }
}
