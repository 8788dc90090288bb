//! Record model for the edge agent.
//!
//! A [`Record`] is a [`Header`] plus a root [`Field`]. Fields form a typed tree
//! (scalars, lists, maps and ordered list-maps) addressed by field paths such as
//! `/a/b[2]/c`.

pub mod error;
pub mod field;
pub mod header;
pub mod path;
pub mod record;

pub use error::{FieldPathError, RecordError};
pub use field::{Field, FieldType, FieldValue};
pub use header::{ErrorInfo, Header};
pub use path::{escape_name, field_path_string, parse_field_path, PathElement};
pub use record::Record;
