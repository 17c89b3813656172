//! Semantic field types and event schemas

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::BuildHasher;
use thiserror::Error;

use crate::value::Value;

/// Semantic type of an event field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    Str,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Timestamp (nanoseconds since epoch)
    Timestamp,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Str => "str",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why an event's fields do not fit a schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },

    #[error("field '{0}' is not declared by the schema")]
    UnknownField(String),
}

/// Ordered field layout of an event type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventSchema {
    fields: IndexMap<String, FieldType>,
}

impl EventSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check a field map against this schema.
    ///
    /// Every declared field must be present with exactly its declared type,
    /// and no undeclared field may appear. Declared fields are checked first,
    /// in declaration order.
    pub fn validate<S: BuildHasher>(
        &self,
        values: &IndexMap<String, Value, S>,
    ) -> Result<(), SchemaViolation> {
        for (name, expected) in &self.fields {
            match values.get(name).map(Value::field_type) {
                None => return Err(SchemaViolation::MissingField(name.clone())),
                Some(found) if found != *expected => {
                    return Err(SchemaViolation::TypeMismatch {
                        field: name.clone(),
                        expected: *expected,
                        found,
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = values.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(SchemaViolation::UnknownField(extra.clone()));
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<(S, FieldType)> for EventSchema {
    fn from_iter<T: IntoIterator<Item = (S, FieldType)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
