pub mod config;
pub mod dump;
pub mod export;
pub mod filter;
pub mod helper;
pub mod memory;
pub mod output;
pub mod parser;
pub mod record;
pub mod source;
