pub mod error;
pub mod out;
pub mod sanitization;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, CoreResult};
pub use out::{OutField, OutSpec};
pub use sanitization::{is_sensitive_field, redact_json_value};
pub use types::{
    Action, ActionAttributes, ActionSpec, ColumnMeta, Filter, QueryResult, ServerAttributes,
    SubAction, SubActionAttributes, ACTION_OVERRIDE_FIELD, DEFAULT_PROVIDER, MUTATION_MARKER,
};
