use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use anyhow::Context;
use tracing::info;

use crate::helper::AnyResult;

/// Input stream: the file at `path`, or stdin.
pub fn open_input(path: Option<&Path>) -> AnyResult<Box<dyn Read + Send>> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            let size = file.metadata().map(|m| m.len()).ok();
            info!(
                operation = "open_input",
                path = %path.display(),
                size,
                "Input opened"
            );
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            info!(operation = "open_input", path = "-", "Reading from stdin");
            Ok(Box::new(io::stdin()))
        }
    }
}

/// Output stream: the file at `path` (truncated), or stdout.
pub fn open_output(path: Option<&Path>) -> AnyResult<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}
