pub mod parser;
pub mod values;
