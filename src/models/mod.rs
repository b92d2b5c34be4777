pub mod column_mapping;

pub use column_mapping::{ColumnMapping, MappingError, MappingField};
