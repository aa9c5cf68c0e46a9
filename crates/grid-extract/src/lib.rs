//! Grid extraction
//!
//! Reads the rows of a recorded grid as ordered header/value maps, infers column
//! types where none were recorded, and keeps the rows that pass every filter.

pub mod errors;
pub mod extractor;
pub mod filters;
pub mod infer;
pub mod types;

pub use errors::GridError;
pub use extractor::{ExtractedGrid, ExtractedRow, GridExtractor};
pub use filters::{evaluate, row_matches, truthy, FilterOperator};
pub use infer::{find_dates, infer_column, infer_date_format, parse_date, ColumnInference};
pub use types::*;
