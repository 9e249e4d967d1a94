//! JSON-AD decoding.
//!
//! Every named object found while walking a payload becomes its own
//! [`Resource`]. Discovered resources are collected in an explicit accumulator
//! so the caller decides what enters the cache.

use serde_json::{Map, Value};

use crate::error::{AtomicError, AtomicResult};
use crate::resource::Resource;
use crate::urls;
use crate::value::val_to_string;

/// Result of a successful parse: the requested resource(s) plus every
/// resource discovered along the way, root first.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub root: T,
    pub all: Vec<Resource>,
}

/// Parses one JSON-AD object.
///
/// When `expected_subject` is given, an `@id` naming a different subject is a
/// structural error.
pub fn parse_object(
    json: &Value,
    expected_subject: Option<&str>,
) -> AtomicResult<Parsed<Resource>> {
    let mut all = Vec::new();
    let root = parse_object_into(json, expected_subject, &mut all)?;
    Ok(Parsed { root, all })
}

/// Parses a JSON array of JSON-AD objects.
pub fn parse_array(json: &Value) -> AtomicResult<Parsed<Vec<Resource>>> {
    let items = json.as_array().ok_or_else(|| {
        AtomicError::parse(format!(
            "Failed parsing JSON expected an array of resources, got {json}"
        ))
    })?;
    let mut all = Vec::new();
    let mut root = Vec::with_capacity(items.len());
    for item in items {
        root.push(parse_object_into(item, None, &mut all)?);
    }
    Ok(Parsed { root, all })
}

/// Parses `json` into a new resource, pushing it and every nested named
/// resource onto `found`.
///
/// On failure the partially built resource carries the error, is no longer
/// loading, and stays in `found`, so callers can still inspect it.
pub fn parse_object_into(
    json: &Value,
    expected_subject: Option<&str>,
    found: &mut Vec<Resource>,
) -> AtomicResult<Resource> {
    let resource = Resource::new_loading(expected_subject.unwrap_or(urls::UNKNOWN_SUBJECT));
    found.push(resource.clone());

    let outcome = match json {
        Value::Object(object) => fill(&resource, object, expected_subject, found),
        other => Err(AtomicError::parse(format!(
            "expected a JSON object, got {other}"
        ))),
    };

    match outcome {
        Ok(()) => {
            resource.set_loading(false);
            if resource.has_class(urls::ERROR) {
                let description = resource
                    .get(urls::DESCRIPTION)
                    .and_then(|v| val_to_string(&v).ok())
                    .unwrap_or_else(|| "Unknown server error".to_string());
                resource.set_error(AtomicError::Server(description));
            }
            Ok(resource)
        }
        Err(err) => {
            let err = err.with_context("Failed parsing JSON");
            resource.fail(err.clone());
            Err(err)
        }
    }
}

fn fill(
    resource: &Resource,
    object: &Map<String, Value>,
    expected_subject: Option<&str>,
    found: &mut Vec<Resource>,
) -> AtomicResult<()> {
    for (key, value) in object {
        if key == "@id" {
            let Value::String(id) = value else {
                return Err(AtomicError::parse("'@id' field must be a string"));
            };
            if let Some(expected) = expected_subject.filter(|s| *s != urls::UNKNOWN_SUBJECT) {
                if id != expected {
                    return Err(AtomicError::parse(format!(
                        "Resource has wrong subject in @id. Received subject was {id}, expected {expected}."
                    )));
                }
            }
            resource.set_subject(id.clone());
            continue;
        }

        let parsed = parse_property_value(value, key, found).map_err(|e| {
            e.with_context(format!(
                "Failed creating value {value} for key {key} in resource {}.",
                resource.subject()
            ))
        })?;
        resource.insert_committed(key.clone(), parsed);
    }
    Ok(())
}

fn parse_property_value(
    value: &Value,
    key: &str,
    found: &mut Vec<Resource>,
) -> AtomicResult<Value> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(value.clone()),
        Value::Array(items) => items
            .iter()
            .map(|item| parse_nested(item, key, found))
            .collect::<AtomicResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(_) => parse_nested(value, key, found),
        Value::Null => Err(AtomicError::parse(format!(
            "Value null in {key} not a string, number, boolean, array or nested Resource"
        ))),
    }
}

/// Array members and nested objects: subjects pass through, named objects
/// become resources referenced by subject, anonymous objects stay embedded.
fn parse_nested(value: &Value, key: &str, found: &mut Vec<Resource>) -> AtomicResult<Value> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Object(object) => match object.get("@id") {
            Some(Value::String(subject)) => {
                parse_object_into(value, None, found)?;
                Ok(Value::String(subject.clone()))
            }
            Some(_) => Err(AtomicError::parse("'@id' field must be a string")),
            None => Ok(value.clone()),
        },
        other => Err(AtomicError::parse(format!(
            "Value {other} in {key} not a string or a nested Resource"
        ))),
    }
}
