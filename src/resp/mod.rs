pub mod parser;
pub mod value;

pub use parser::{IncrementalParser, Parsed};
pub use value::Value;
