use std::path::PathBuf;

use anyhow::ensure;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    dump::MIN_TARGET_VERSION,
    filter::{FilterConfig, FilterSpec},
    helper::AnyResult,
    impl_serde_str_conversion,
    parser::restore::RDB_VERSION,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExportConfig {
    /// RDB (or RDB+AOF) file; `None` reads stdin.
    pub input: Option<PathBuf>,
    /// `None` writes to stdout.
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub resp: RespConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Write output on a background worker fed through a bounded queue.
    #[serde(default)]
    pub async_output: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Verify the trailing RDB checksum.
    #[serde(default = "default_true")]
    pub verify_checksum: bool,
}

impl ExportConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            input: None,
            output: None,
            format,
            filter: FilterConfig::default(),
            dump: DumpConfig::default(),
            text: TextConfig::default(),
            resp: RespConfig::default(),
            memory: MemoryConfig::default(),
            async_output: false,
            queue_capacity: default_queue_capacity(),
            verify_checksum: true,
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> AnyResult<()> {
        ensure!(
            (MIN_TARGET_VERSION..=RDB_VERSION).contains(&self.dump.target_version),
            "Target RDB version must be within {}..={}, got: {}",
            MIN_TARGET_VERSION,
            RDB_VERSION,
            self.dump.target_version
        );
        ensure!(
            self.resp.batch_size > 0,
            "Batch size must be greater than 0"
        );
        ensure!(
            self.text.delimiter.is_ascii() && !self.text.delimiter.is_ascii_control(),
            "Delimiter must be a printable ASCII character, got: {:?}",
            self.text.delimiter
        );
        ensure!(
            self.text.delimiter != '\\',
            "Delimiter cannot be a backslash"
        );
        ensure!(
            !self.async_output || self.queue_capacity > 0,
            "Queue capacity must be greater than 0"
        );
        if let Some(top) = self.memory.top {
            ensure!(top > 0, "Top must be greater than 0");
        }
        FilterSpec::new(&self.filter)?;
        Ok(())
    }

    /// Whether values must keep their raw bytes for re-encoding.
    pub fn needs_capture(&self) -> bool {
        match self.format {
            OutputFormat::Rdb | OutputFormat::Resp => true,
            OutputFormat::Text | OutputFormat::Json | OutputFormat::Memory => false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
    Resp,
    Rdb,
    Memory,
}

impl_serde_str_conversion!(OutputFormat);

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DumpConfig {
    /// RDB version of RESTORE payloads and written RDB files.
    #[serde(default = "default_target_version")]
    pub target_version: u16,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            target_version: default_target_version(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TextConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RespConfig {
    /// Elements per RPUSH/SADD/ZADD/HMSET command.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Overwrite existing keys on the target.
    #[serde(default)]
    pub replace: bool,
    /// Send every key as RESTORE, not only streams and module values.
    #[serde(default)]
    pub restore: bool,
}

impl Default for RespConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            replace: false,
            restore: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Report only the `top` largest keys.
    #[serde(default)]
    pub top: Option<usize>,
    /// Skip keys estimated below this size.
    #[serde(default)]
    pub min_bytes: u64,
    /// Seed for skiplist level draws.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_target_version() -> u16 {
    RDB_VERSION
}

fn default_delimiter() -> char {
    ','
}

fn default_batch_size() -> usize {
    128
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}
