//! Field readers over loosely-typed JSON documents.
//!
//! Each reader returns either the typed value or one [`ValidationError`]
//! naming the full field path, so validators can check every field and fold
//! the failures into a single list.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::validation::{ErrorCode, ValidationError};

/// Read and parse a JSON document from disk.
pub(crate) fn read_document(path: &Path, context: &'static str) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_document(&text, context)
}

/// Parse a JSON document from text.
pub(crate) fn parse_document(text: &str, context: &'static str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::Json {
        context,
        message: e.to_string(),
    })
}

/// A view over one JSON object.
///
/// Missing and mistyped fields are reported with `code`, and field names are
/// qualified with `prefix` (e.g. `coordinate_system.` or `bricks[3].`).
#[derive(Clone)]
pub(crate) struct Fields<'a> {
    object: &'a Map<String, Value>,
    prefix: String,
    code: ErrorCode,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(object: &'a Map<String, Value>, prefix: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            object,
            prefix: prefix.into(),
            code,
        }
    }

    /// Qualified name of a field in this object.
    pub(crate) fn path(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Raw value, with JSON `null` treated as absent.
    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.object.get(key).filter(|value| !value.is_null())
    }

    pub(crate) fn require(&self, key: &str) -> std::result::Result<&'a Value, ValidationError> {
        self.get(key).ok_or_else(|| {
            ValidationError::new(
                self.code,
                format!("missing required field {}", self.path(key)),
                self.path(key),
            )
        })
    }

    fn invalid(&self, key: &str, expected: &str, value: &Value) -> ValidationError {
        ValidationError::new(
            self.code,
            format!("{} must be {expected}, got: {value}", self.path(key)),
            self.path(key),
        )
    }

    pub(crate) fn f64(&self, key: &str) -> std::result::Result<f64, ValidationError> {
        let value = self.require(key)?;
        value
            .as_f64()
            .ok_or_else(|| self.invalid(key, "a number", value))
    }

    pub(crate) fn i64(&self, key: &str) -> std::result::Result<i64, ValidationError> {
        let value = self.require(key)?;
        value
            .as_i64()
            .ok_or_else(|| self.invalid(key, "an integer", value))
    }

    pub(crate) fn i32(&self, key: &str) -> std::result::Result<i32, ValidationError> {
        let value = self.require(key)?;
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| self.invalid(key, "a 32-bit integer", value))
    }

    pub(crate) fn str(&self, key: &str) -> std::result::Result<&'a str, ValidationError> {
        let value = self.require(key)?;
        value
            .as_str()
            .ok_or_else(|| self.invalid(key, "a string", value))
    }

    /// An optional string: absent is `None`, present-but-not-a-string is an error.
    pub(crate) fn optional_str(
        &self,
        key: &str,
    ) -> std::result::Result<Option<&'a str>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a string", value)),
        }
    }

    pub(crate) fn f64_array3(&self, key: &str) -> std::result::Result<[f64; 3], ValidationError> {
        let value = self.require(key)?;
        let parsed = value.as_array().filter(|items| items.len() == 3).and_then(|items| {
            Some([items[0].as_f64()?, items[1].as_f64()?, items[2].as_f64()?])
        });
        parsed.ok_or_else(|| self.invalid(key, "an array of 3 numbers", value))
    }

    pub(crate) fn i32_array3(&self, key: &str) -> std::result::Result<[i32; 3], ValidationError> {
        let value = self.require(key)?;
        let as_i32 = |item: &Value| item.as_i64().and_then(|v| i32::try_from(v).ok());
        let parsed = value
            .as_array()
            .filter(|items| items.len() == 3)
            .and_then(|items| Some([as_i32(&items[0])?, as_i32(&items[1])?, as_i32(&items[2])?]));
        parsed.ok_or_else(|| self.invalid(key, "an array of 3 integers", value))
    }

    /// A nested object, whose fields are reported under `key.`.
    pub(crate) fn object(&self, key: &str) -> std::result::Result<Fields<'a>, ValidationError> {
        let value = self.require(key)?;
        let object = value
            .as_object()
            .ok_or_else(|| self.invalid(key, "an object", value))?;
        Ok(Fields::new(object, format!("{}.", self.path(key)), self.code))
    }

    /// A nested object that may be absent.
    pub(crate) fn optional_object(
        &self,
        key: &str,
    ) -> std::result::Result<Option<Fields<'a>>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(_) => self.object(key).map(Some),
        }
    }
}
