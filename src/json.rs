//! Read-only view over server JSON, plus a builder for outgoing claims.
//!
//! ACME resources are server-owned documents. Instead of binding every
//! response to a rigid struct, resource objects keep the raw document and
//! read it through [`Json`], which offers typed accessors that distinguish
//! "absent" from "present but malformed".

use std::{fmt, sync::Arc};

use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use url::Url;

use crate::{
    error::{Error, Result},
    problem::Problem,
    resource::Status,
};

/// An immutable JSON tree.
///
/// Cheap to clone; the underlying document is shared.
#[derive(Debug, Clone)]
pub struct Json {
    value: Arc<Value>,
}

impl Json {
    /// Parses a JSON document.
    pub fn parse(input: &str) -> Result<Json> {
        let value = serde_json::from_str(input)?;
        Ok(Json {
            value: Arc::new(value),
        })
    }

    /// An empty JSON object.
    pub fn empty() -> Json {
        Json {
            value: Arc::new(Value::Object(serde_json::Map::new())),
        }
    }

    pub(crate) fn from_value(value: Value) -> Json {
        Json {
            value: Arc::new(value),
        }
    }

    /// Looks up a field of this object.
    ///
    /// Always succeeds; the returned accessor reports absence through its
    /// `as_*` methods.
    pub fn get<'a>(&'a self, name: &str) -> JsonValue<'a> {
        JsonValue {
            name: name.to_owned(),
            value: self.value.get(name),
        }
    }

    /// Whether the given field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.value.get(name).is_some()
    }

    pub(crate) fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Accessor for a single field of a [`Json`] object.
#[derive(Debug)]
pub struct JsonValue<'a> {
    name: String,
    value: Option<&'a Value>,
}

impl<'a> JsonValue<'a> {
    /// Whether the field exists at all.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// The field as a string, or `None` if absent or not a string.
    pub fn as_str(&self) -> Option<&'a str> {
        self.value.and_then(Value::as_str)
    }

    /// The field as a string, failing if absent.
    pub fn required_str(&self) -> Result<&'a str> {
        self.as_str()
            .ok_or_else(|| Error::protocol(format!("required field '{}' is missing", self.name)))
    }

    /// The field as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.value.and_then(Value::as_bool)
    }

    /// The field as an integer.
    pub fn as_int(&self) -> Option<i64> {
        self.value.and_then(Value::as_i64)
    }

    /// The field parsed as a URL.
    ///
    /// Absent fields are `Ok(None)`; present but malformed values fail.
    pub fn as_url(&self) -> Result<Option<Url>> {
        match self.as_str() {
            None => Ok(None),
            Some(s) => Url::parse(s)
                .map(Some)
                .map_err(|err| Error::protocol(format!("invalid URL in '{}': {err}", self.name))),
        }
    }

    /// The field parsed as a URL, failing if absent.
    pub fn required_url(&self) -> Result<Url> {
        self.as_url()?
            .ok_or_else(|| Error::protocol(format!("required URL '{}' is missing", self.name)))
    }

    /// The field parsed as an RFC 3339 instant.
    pub fn as_instant(&self) -> Result<Option<OffsetDateTime>> {
        match self.as_str() {
            None => Ok(None),
            Some(s) => OffsetDateTime::parse(s, &Rfc3339).map(Some).map_err(|err| {
                Error::protocol(format!("invalid timestamp in '{}': {err}", self.name))
            }),
        }
    }

    /// The field as a nested object.
    pub fn as_object(&self) -> Option<Json> {
        match self.value {
            Some(value @ Value::Object(_)) => Some(Json::from_value(value.clone())),
            _ => None,
        }
    }

    /// The field as an array of values. Absent fields yield an empty vec.
    pub fn as_array(&self) -> Vec<Json> {
        match self.value {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| Json::from_value(item.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The field as an array of strings, skipping non-string entries.
    pub fn as_str_array(&self) -> Vec<String> {
        match self.value {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The field interpreted as a resource [`Status`].
    ///
    /// Absent or unrecognized values map to [`Status::Unknown`].
    pub fn as_status(&self) -> Status {
        Status::parse(self.as_str())
    }

    /// The field interpreted as an RFC 7807 problem document.
    pub fn as_problem(&self) -> Option<Problem> {
        self.as_object().map(Problem::new)
    }
}

/// Builder for outgoing JSON claims.
///
/// Keys keep their insertion order.
#[derive(Debug, Default)]
pub struct JsonBuilder {
    map: serde_json::Map<String, Value>,
}

impl JsonBuilder {
    pub fn new() -> JsonBuilder {
        JsonBuilder::default()
    }

    /// Adds a claim. Accepts anything serde_json can represent as a value.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.map.insert(key.to_owned(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Serializes the claims object, `{}` when nothing was added.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.map)?)
    }

    /// Finishes the builder into an immutable [`Json`].
    pub fn build(&self) -> Json {
        Json::from_value(Value::Object(self.map.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_on_present_fields() {
        let json = Json::parse(
            r#"{
                "type": "http-01",
                "url": "https://example.com/acme/some-location",
                "validated": "2015-12-12T17:19:36.336785823Z",
                "wildcard": true,
                "contact": ["mailto:foo@example.com"]
            }"#,
        )
        .unwrap();

        assert_eq!(json.get("type").as_str(), Some("http-01"));
        assert_eq!(
            json.get("url").required_url().unwrap().as_str(),
            "https://example.com/acme/some-location"
        );
        assert_eq!(json.get("wildcard").as_bool(), Some(true));
        assert_eq!(
            json.get("contact").as_str_array(),
            vec!["mailto:foo@example.com".to_owned()]
        );

        let validated = json.get("validated").as_instant().unwrap().unwrap();
        assert_eq!(validated.year(), 2015);
        assert_eq!(validated.nanosecond(), 336_785_823);
    }

    #[test]
    fn absent_fields_read_as_none() {
        let json = Json::parse(r#"{"type":"generic-01"}"#).unwrap();

        assert!(!json.get("notPresent").exists());
        assert_eq!(json.get("notPresent").as_str(), None);
        assert!(json.get("notPresentUrl").as_url().unwrap().is_none());
        assert!(json.get("notPresent").as_instant().unwrap().is_none());
        assert!(json.get("notPresent").as_array().is_empty());
    }

    #[test]
    fn malformed_values_fail() {
        let json = Json::parse(r#"{"url":"::not a url::","when":"yesterday"}"#).unwrap();

        assert!(matches!(
            json.get("url").as_url(),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            json.get("when").as_instant(),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            json.get("missing").required_str(),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn builder_produces_plain_object() {
        let mut builder = JsonBuilder::new();
        assert_eq!(builder.to_json_string().unwrap(), "{}");

        builder.put("status", "deactivated");
        assert_eq!(
            builder.to_json_string().unwrap(),
            r#"{"status":"deactivated"}"#
        );
    }
}
