//! Application records.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the field that identifies a record within its collection.
pub const ORIGIN_FIELD: &str = "origin";

/// An opaque application record.
///
/// The payload is a JSON object owned by the application; the engines only
/// ever look at its `origin` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Application {
    origin: String,
    fields: Map<String, Value>,
}

impl Application {
    /// Creates a record with only an origin.
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        let mut fields = Map::new();
        fields.insert(ORIGIN_FIELD.to_string(), Value::String(origin.clone()));
        Self { origin, fields }
    }

    /// Builds a record from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRecord`] if the value is not an object
    /// or has no string `origin`.
    pub fn from_json(value: Value) -> StorageResult<Self> {
        let Value::Object(fields) = value else {
            return Err(StorageError::InvalidRecord(
                "application record must be a JSON object".into(),
            ));
        };
        let origin = match fields.get(ORIGIN_FIELD) {
            Some(Value::String(origin)) if !origin.is_empty() => origin.clone(),
            Some(Value::String(_)) => {
                return Err(StorageError::InvalidRecord("empty origin".into()));
            }
            Some(_) => {
                return Err(StorageError::InvalidRecord("origin must be a string".into()));
            }
            None => return Err(StorageError::InvalidRecord("missing origin".into())),
        };
        Ok(Self { origin, fields })
    }

    /// Parses a record from serialized JSON.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        Self::from_json(serde_json::from_str(json)?)
    }

    /// Sets a payload field. The `origin` field cannot be overwritten.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != ORIGIN_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Returns the record's origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the payload as a JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Serializes the record to a JSON string.
    pub fn to_json_string(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

impl TryFrom<Value> for Application {
    type Error = StorageError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

impl From<Application> for Value {
    fn from(app: Application) -> Self {
        Value::Object(app.fields)
    }
}
