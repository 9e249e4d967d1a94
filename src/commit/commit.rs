use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::agent::verify_signature;
use crate::error::{AtomicError, AtomicResult};
use crate::urls;

/// Kind of change a delta carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Set,
    Remove,
    Push,
}

/// One property change inside a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub property: String,
    pub operation: Operation,
    /// `None` for removals.
    pub value: Option<Value>,
}

/// A signed change record for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub subject: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub signer: String,
    pub set: BTreeMap<String, Value>,
    pub remove: Vec<String>,
    pub push: BTreeMap<String, Vec<Value>>,
    pub destroy: bool,
    pub previous_commit: Option<String>,
    pub signature: Option<String>,
}

impl Commit {
    /// Deltas ordered by property URL, then by operation.
    pub fn deltas(&self) -> Vec<Delta> {
        let mut deltas: Vec<Delta> = self
            .set
            .iter()
            .map(|(property, value)| Delta {
                property: property.clone(),
                operation: Operation::Set,
                value: Some(value.clone()),
            })
            .chain(self.remove.iter().map(|property| Delta {
                property: property.clone(),
                operation: Operation::Remove,
                value: None,
            }))
            .chain(self.push.iter().map(|(property, values)| Delta {
                property: property.clone(),
                operation: Operation::Push,
                value: Some(Value::Array(values.clone())),
            }))
            .collect();
        deltas.sort_by(|a, b| {
            a.property
                .cmp(&b.property)
                .then(a.operation.cmp(&b.operation))
        });
        deltas
    }

    /// True when the commit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty() && self.push.is_empty() && !self.destroy
    }

    fn unsigned_object(&self) -> Map<String, Value> {
        let mut object = Map::new();
        object.insert(urls::SUBJECT.into(), Value::String(self.subject.clone()));
        object.insert(urls::CREATED_AT.into(), Value::from(self.created_at));
        object.insert(urls::SIGNER.into(), Value::String(self.signer.clone()));
        object.insert(
            urls::IS_A.into(),
            Value::Array(vec![Value::String(urls::COMMIT.into())]),
        );
        if !self.set.is_empty() {
            let set: Map<String, Value> = self
                .set
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            object.insert(urls::SET.into(), Value::Object(set));
        }
        if !self.remove.is_empty() {
            let mut remove = self.remove.clone();
            remove.sort();
            object.insert(
                urls::REMOVE.into(),
                Value::Array(remove.into_iter().map(Value::String).collect()),
            );
        }
        if !self.push.is_empty() {
            let push: Map<String, Value> = self
                .push
                .iter()
                .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
                .collect();
            object.insert(urls::PUSH.into(), Value::Object(push));
        }
        if self.destroy {
            object.insert(urls::DESTROY.into(), Value::Bool(true));
        }
        if let Some(previous) = &self.previous_commit {
            object.insert(urls::PREVIOUS_COMMIT.into(), Value::String(previous.clone()));
        }
        object
    }

    /// The bytes the signer signs: the commit without its signature, keys sorted.
    pub fn serialize_for_signing(&self) -> AtomicResult<String> {
        Ok(serde_json::to_string(&Value::Object(self.unsigned_object()))?)
    }

    /// The commit as a JSON-AD object, ready to post.
    pub fn to_json_ad(&self) -> AtomicResult<Value> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| AtomicError::Signing("commit is not signed".into()))?;
        let mut object = self.unsigned_object();
        object.insert(urls::SIGNATURE.into(), Value::String(signature.clone()));
        Ok(Value::Object(object))
    }

    /// Decodes a posted commit.
    pub fn from_json_ad(json: &Value) -> AtomicResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| AtomicError::parse("commit must be a JSON object"))?;
        let string = |key: &str| -> AtomicResult<String> {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AtomicError::parse(format!("commit is missing {key}")))
        };

        let set = match object.get(urls::SET) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(other) => {
                return Err(AtomicError::parse(format!("commit set must be an object, got {other}")))
            }
            None => BTreeMap::new(),
        };
        let remove = match object.get(urls::REMOVE) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| AtomicError::parse("commit remove must list property URLs"))
                })
                .collect::<AtomicResult<Vec<_>>>()?,
            Some(_) => return Err(AtomicError::parse("commit remove must be an array")),
            None => Vec::new(),
        };
        let push = match object.get(urls::PUSH) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::Array(items) => Ok((k.clone(), items.clone())),
                    _ => Err(AtomicError::parse(format!("commit push for {k} must be an array"))),
                })
                .collect::<AtomicResult<BTreeMap<_, _>>>()?,
            Some(_) => return Err(AtomicError::parse("commit push must be an object")),
            None => BTreeMap::new(),
        };

        Ok(Commit {
            subject: string(urls::SUBJECT)?,
            created_at: object
                .get(urls::CREATED_AT)
                .and_then(Value::as_i64)
                .ok_or_else(|| AtomicError::parse("commit is missing createdAt"))?,
            signer: string(urls::SIGNER)?,
            set,
            remove,
            push,
            destroy: object
                .get(urls::DESTROY)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            previous_commit: object
                .get(urls::PREVIOUS_COMMIT)
                .and_then(Value::as_str)
                .map(str::to_string),
            signature: object
                .get(urls::SIGNATURE)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Checks the signature against the signer's base64 public key.
    pub fn verify(&self, public_key: &str) -> AtomicResult<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| AtomicError::Signing("commit is not signed".into()))?;
        verify_signature(public_key, self.serialize_for_signing()?.as_bytes(), signature)
    }
}
