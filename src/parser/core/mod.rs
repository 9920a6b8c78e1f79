pub mod combinators;
pub mod raw;
pub mod reader;
