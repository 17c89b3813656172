//! Event type registry
//!
//! Maps type names to their schemas. Registration happens during setup; after
//! that the engine only reads from it.

use ceplite_core::EventSchema;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{IngestError, RegistrationError};
use crate::event::Fields;

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: FxHashMap<String, Arc<EventSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Re-registering an identical schema is a no-op.
    pub fn register(&mut self, name: &str, schema: EventSchema) -> Result<(), RegistrationError> {
        if let Some(existing) = self.types.get(name) {
            if **existing == schema {
                return Ok(());
            }
            return Err(RegistrationError::DuplicateType(name.to_string()));
        }
        info!(
            "Registered event type: {} with {} fields",
            name,
            schema.len()
        );
        self.types.insert(name.to_string(), Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EventSchema>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Validate a field map against the named type.
    pub fn validate(&self, name: &str, fields: &Fields) -> Result<(), IngestError> {
        let schema = self
            .types
            .get(name)
            .ok_or_else(|| IngestError::UnknownType(name.to_string()))?;
        schema
            .validate(fields)
            .map_err(|violation| IngestError::SchemaMismatch {
                event_type: name.to_string(),
                violation,
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
