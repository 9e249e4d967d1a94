use std::collections::BTreeMap;

use serde_json::Value;

/// A local edit not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    Set(Value),
    Remove,
    /// Values appended after whatever the committed array holds.
    Push(Vec<Value>),
}

impl PendingChange {
    pub fn operation(&self) -> &'static str {
        match self {
            PendingChange::Set(_) => "set",
            PendingChange::Remove => "remove",
            PendingChange::Push(_) => "push",
        }
    }

    /// Value seen by readers given the committed value underneath.
    pub fn effective(&self, committed: Option<&Value>) -> Option<Value> {
        match self {
            PendingChange::Set(value) => Some(value.clone()),
            PendingChange::Remove => None,
            PendingChange::Push(appended) => {
                let mut items = committed
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                items.extend(appended.iter().cloned());
                Some(Value::Array(items))
            }
        }
    }

    /// Applies this change to a committed property map.
    pub fn apply_to(&self, property: &str, propvals: &mut BTreeMap<String, Value>) {
        match self.effective(propvals.get(property)) {
            Some(value) => {
                propvals.insert(property.to_string(), value);
            }
            None => {
                propvals.remove(property);
            }
        }
    }
}

/// Pending changes keyed by property URL. Ordered so commits are reproducible.
pub type PendingChanges = BTreeMap<String, PendingChange>;

/// Removes from `pending` whatever `sent` already covered, keeping edits
/// staged after the snapshot was taken.
pub(crate) fn settle(pending: &mut PendingChanges, sent: &PendingChanges) {
    for (property, sent_change) in sent {
        let Some(current) = pending.get_mut(property) else {
            continue;
        };
        let settled = if current == sent_change {
            true
        } else if let (PendingChange::Push(now), PendingChange::Push(was)) = (current, sent_change)
        {
            if now.starts_with(was) {
                *now = now.split_off(was.len());
                now.is_empty()
            } else {
                false
            }
        } else {
            false
        };
        if settled {
            pending.remove(property);
        }
    }
}
