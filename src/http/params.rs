//! Request parameter resolution.
//!
//! Both endpoints accept their fields from the query string and from an
//! optional JSON object body.  Which source wins depends on the endpoint and
//! the field; the rules live here so the handlers only see resolved values.
//! Empty strings are treated as absent everywhere.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::WhitelistError;
use crate::naming::DEFAULT_FILE_NAME;

/// Query string and JSON body of one request.
#[derive(Debug, Default)]
pub struct RequestParams {
    query: HashMap<String, String>,
    body: Map<String, Value>,
}

impl RequestParams {
    /// An empty or whitespace-only body is treated as `{}`; anything else
    /// must be a JSON object.
    pub fn parse(query: HashMap<String, String>, body: &Bytes) -> Result<Self, WhitelistError> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                _ => return Err(WhitelistError::InvalidBody),
            }
        };
        Ok(Self { query, body })
    }

    pub fn from_query(query: HashMap<String, String>) -> Self {
        Self {
            query,
            body: Map::new(),
        }
    }

    fn query(&self, key: &str) -> Option<String> {
        self.query.get(key).filter(|v| !v.is_empty()).cloned()
    }

    /// Strings are taken as-is; numbers and booleans by their JSON text.
    /// `null`, arrays and objects count as absent.
    fn body(&self, key: &str) -> Option<String> {
        let value = match self.body.get(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        (!value.is_empty()).then_some(value)
    }

    /// Fields for `POST /whitelist/add`.
    ///
    /// `environment` and `tenant` prefer the query, `entry` prefers the
    /// body.  A query `file` equal to the default name does not shadow a
    /// body `file`.
    pub fn add_fields(&self) -> AddFields {
        let file = match self.query("file") {
            Some(file) if file != DEFAULT_FILE_NAME => file,
            _ => self
                .body("file")
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        };
        AddFields {
            entry: self.body("entry").or_else(|| self.query("entry")),
            environment: self.query("environment").or_else(|| self.body("environment")),
            tenant: self.query("tenant").or_else(|| self.body("tenant")),
            file,
        }
    }

    /// Fields for `/whitelist/view`: query first, then body, per field.
    pub fn view_fields(&self) -> ViewFields {
        ViewFields {
            environment: self.query("environment").or_else(|| self.body("environment")),
            tenant: self.query("tenant").or_else(|| self.body("tenant")),
            file: self
                .query("file")
                .or_else(|| self.body("file"))
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFields {
    pub entry: Option<String>,
    pub environment: Option<String>,
    pub tenant: Option<String>,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFields {
    pub environment: Option<String>,
    pub tenant: Option<String>,
    pub file: String,
}
