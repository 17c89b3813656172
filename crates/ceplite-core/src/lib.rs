//! # ceplite core
//!
//! Foundational types shared by the ceplite runtime and its callers:
//!
//! - [`value`]: the closed set of runtime values (`Str`, `Int`, `Float`,
//!   `Timestamp`)
//! - [`types`]: semantic field types and event schemas with validation
//!
//! ```rust
//! use ceplite_core::{EventSchema, FieldType, Value};
//!
//! let schema = EventSchema::new()
//!     .with_field("key", FieldType::Str)
//!     .with_field("closing", FieldType::Float);
//! assert_eq!(schema.field_type("closing"), Some(FieldType::Float));
//! assert_eq!(Value::from(12.5).field_type(), FieldType::Float);
//! ```

pub mod types;
pub mod value;

pub use types::{EventSchema, FieldType, SchemaViolation};
pub use value::Value;
