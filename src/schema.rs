//! Datatypes and the typed Property projection of a property resource.

use serde_json::Value;

use crate::error::{AtomicError, AtomicResult};
use crate::resource::Resource;
use crate::urls;
use crate::value::{type_name, val_to_string, val_to_subjects};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    String,
    Markdown,
    Slug,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    AtomicUrl,
    ResourceArray,
    Json,
    Unknown,
}

impl Datatype {
    pub fn from_url(url: &str) -> Self {
        match url {
            urls::STRING => Datatype::String,
            urls::MARKDOWN => Datatype::Markdown,
            urls::SLUG => Datatype::Slug,
            urls::INTEGER => Datatype::Integer,
            urls::FLOAT => Datatype::Float,
            urls::BOOLEAN => Datatype::Boolean,
            urls::DATE => Datatype::Date,
            urls::TIMESTAMP => Datatype::Timestamp,
            urls::ATOMIC_URL => Datatype::AtomicUrl,
            urls::RESOURCE_ARRAY => Datatype::ResourceArray,
            urls::JSON => Datatype::Json,
            _ => Datatype::Unknown,
        }
    }

    pub fn url(&self) -> Option<&'static str> {
        Some(match self {
            Datatype::String => urls::STRING,
            Datatype::Markdown => urls::MARKDOWN,
            Datatype::Slug => urls::SLUG,
            Datatype::Integer => urls::INTEGER,
            Datatype::Float => urls::FLOAT,
            Datatype::Boolean => urls::BOOLEAN,
            Datatype::Date => urls::DATE,
            Datatype::Timestamp => urls::TIMESTAMP,
            Datatype::AtomicUrl => urls::ATOMIC_URL,
            Datatype::ResourceArray => urls::RESOURCE_ARRAY,
            Datatype::Json => urls::JSON,
            Datatype::Unknown => return None,
        })
    }

    /// Checks that the value has the shape this datatype requires.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            Datatype::String | Datatype::Markdown => value.is_string(),
            Datatype::Slug => value.as_str().is_some_and(is_slug),
            Datatype::Integer | Datatype::Timestamp => value.is_i64() || value.is_u64(),
            Datatype::Float => value.is_number(),
            Datatype::Boolean => value.is_boolean(),
            Datatype::Date => value.as_str().is_some_and(|s| {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
            Datatype::AtomicUrl => match value {
                Value::String(s) => is_url(s),
                Value::Object(_) => true,
                _ => false,
            },
            Datatype::ResourceArray => value.as_array().is_some_and(|items| {
                items.iter().all(|item| match item {
                    Value::String(s) => is_url(s),
                    Value::Object(_) => true,
                    _ => false,
                })
            }),
            Datatype::Json | Datatype::Unknown => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{} is not a valid {:?}", describe(value), self))
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => type_name(other).to_string(),
    }
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !s.contains("--")
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://")
}

/// Typed projection of a property resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub subject: String,
    pub datatype: Datatype,
    pub shortname: String,
    pub description: String,
    /// For URL-valued properties, the expected class of referenced resources.
    pub class_type: Option<String>,
    /// Enumerated permitted values.
    pub allows_only: Option<Vec<String>>,
}

impl Property {
    pub fn from_resource(resource: &Resource) -> AtomicResult<Self> {
        let subject = resource.subject();
        if resource.is_loading() {
            return Err(AtomicError::NotFound(format!(
                "property {subject} has not finished loading"
            )));
        }
        if let Some(err) = resource.error() {
            return Err(err.with_context(format!("Error getting Property {subject}.")));
        }

        let datatype = resource
            .get(urls::DATATYPE_PROP)
            .and_then(|v| v.as_str().map(Datatype::from_url))
            .unwrap_or(Datatype::Unknown);
        let shortname = resource
            .get(urls::SHORTNAME)
            .map(|v| val_to_string(&v))
            .transpose()?
            .unwrap_or_default();
        let description = resource
            .get(urls::DESCRIPTION)
            .map(|v| val_to_string(&v))
            .transpose()?
            .unwrap_or_default();
        let class_type = resource
            .get(urls::CLASSTYPE_PROP)
            .and_then(|v| v.as_str().map(str::to_string));
        let allows_only = resource
            .get(urls::ALLOWS_ONLY)
            .map(|v| val_to_subjects(&v))
            .transpose()?;

        Ok(Property {
            subject,
            datatype,
            shortname,
            description,
            class_type,
            allows_only,
        })
    }

    /// Datatype shape and `allowsOnly` membership.
    pub fn validate(&self, value: &Value) -> AtomicResult<()> {
        self.datatype.check(value).map_err(|msg| {
            AtomicError::validation(format!("{msg} for property {}", self.shortname_or_subject()))
        })?;

        let Some(allowed) = self.allows_only.as_ref().filter(|a| !a.is_empty()) else {
            return Ok(());
        };
        let candidates: Vec<String> = match value {
            Value::Array(_) => val_to_subjects(value)?,
            other => vec![val_to_string(other)?],
        };
        if let Some(bad) = candidates.iter().find(|c| !allowed.contains(c)) {
            return Err(AtomicError::validation(format!(
                "'{bad}' is not one of the values allowed by {}",
                self.shortname_or_subject()
            )));
        }
        Ok(())
    }

    fn shortname_or_subject(&self) -> &str {
        if self.shortname.is_empty() {
            &self.subject
        } else {
            &self.shortname
        }
    }
}
