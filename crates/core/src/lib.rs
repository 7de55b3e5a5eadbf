pub mod error;
pub mod field_value;
pub mod ids;
pub mod record;
pub mod schema;
pub mod validator;

pub use error::CoreError;
pub use field_value::{FieldValue, Fields};
pub use ids::*;
pub use record::{fields_digest, ArchivedRecord, LogicalRecord, ValidatedRecord, MAX_VERSION};
pub use schema::{Constraint, FieldSpec, FieldType, Schema, SchemaRegistry};
pub use validator::{ValidationError, Violation, ViolationReason};
