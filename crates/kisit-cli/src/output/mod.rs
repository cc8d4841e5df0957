pub mod json;
pub mod table;

pub use crate::cli::OutputFormat;
