use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rdbexport::{
    config::{ExportConfig, MemoryConfig, OutputFormat, RespConfig, TextConfig},
    export::export,
    filter::FilterConfig,
    parser::{model::RecordType, module::ModuleParserRegistry, restore::RDB_VERSION},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about)]
struct MainCli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// One delimited line per key
    Text(TextArgs),
    /// A JSON array with one object per key
    Json(CommonArgs),
    /// Redis commands recreating every key (AOF tail forwarded)
    Resp(RespArgs),
    /// A new RDB file holding the selected keys
    Rdb(RdbArgs),
    /// CSV memory usage report
    Memory(MemoryArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// RDB or RDB+AOF file (default: stdin)
    #[arg(env = "RDBEXPORT_INPUT")]
    input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long, env = "RDBEXPORT_OUTPUT")]
    output: Option<PathBuf>,

    /// Only these databases (repeatable)
    #[arg(long = "db", value_delimiter = ',', env = "RDBEXPORT_DBS")]
    dbs: Vec<u64>,

    /// Only these exact keys (repeatable)
    #[arg(long = "key")]
    keys: Vec<String>,

    /// Only keys fully matching these regular expressions (repeatable)
    #[arg(long = "key-pattern", env = "RDBEXPORT_KEY_PATTERN")]
    key_patterns: Vec<String>,

    /// Only these types: string, list, set, zset, hash, stream, module
    #[arg(long = "type", value_delimiter = ',', env = "RDBEXPORT_TYPES")]
    types: Vec<RecordType>,

    /// Write output on a background worker
    #[arg(long, env = "RDBEXPORT_ASYNC_OUTPUT")]
    async_output: bool,

    /// Entries buffered for the background worker
    #[arg(long, default_value_t = 1024, env = "RDBEXPORT_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Do not verify the trailing RDB checksum
    #[arg(long)]
    skip_checksum: bool,
}

impl CommonArgs {
    fn into_config(self, format: OutputFormat) -> ExportConfig {
        let mut config = ExportConfig::new(format);
        config.input = self.input;
        config.output = self.output;
        config.filter = FilterConfig {
            dbs: self.dbs,
            keys: self.keys,
            key_patterns: self.key_patterns,
            types: self.types,
        };
        config.async_output = self.async_output;
        config.queue_capacity = self.queue_capacity;
        config.verify_checksum = !self.skip_checksum;
        config
    }
}

#[derive(Args)]
struct TextArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Field delimiter
    #[arg(long, default_value_t = ',', env = "RDBEXPORT_DELIMITER")]
    delimiter: char,
}

#[derive(Args)]
struct RespArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Elements per RPUSH/SADD/ZADD/HMSET command
    #[arg(long, default_value_t = 128, env = "RDBEXPORT_BATCH_SIZE")]
    batch_size: usize,

    /// Overwrite existing keys
    #[arg(long)]
    replace: bool,

    /// Send every key as RESTORE
    #[arg(long)]
    restore: bool,

    /// RDB version of RESTORE payloads
    #[arg(long, default_value_t = RDB_VERSION, env = "RDBEXPORT_TARGET_VERSION")]
    target_version: u16,
}

#[derive(Args)]
struct RdbArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// RDB version of the written file
    #[arg(long, default_value_t = RDB_VERSION, env = "RDBEXPORT_TARGET_VERSION")]
    target_version: u16,
}

#[derive(Args)]
struct MemoryArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Report only the N largest keys
    #[arg(long)]
    top: Option<usize>,

    /// Skip keys estimated below this many bytes
    #[arg(long, default_value_t = 0)]
    min_bytes: u64,

    /// Seed for the skiplist level draws
    #[arg(long, env = "RDBEXPORT_SEED")]
    seed: Option<u64>,
}

impl Command {
    fn into_config(self) -> ExportConfig {
        match self {
            Command::Text(args) => {
                let mut config = args.common.into_config(OutputFormat::Text);
                config.text = TextConfig {
                    delimiter: args.delimiter,
                };
                config
            }
            Command::Json(args) => args.into_config(OutputFormat::Json),
            Command::Resp(args) => {
                let mut config = args.common.into_config(OutputFormat::Resp);
                config.resp = RespConfig {
                    batch_size: args.batch_size,
                    replace: args.replace,
                    restore: args.restore,
                };
                config.dump.target_version = args.target_version;
                config
            }
            Command::Rdb(args) => {
                let mut config = args.common.into_config(OutputFormat::Rdb);
                config.dump.target_version = args.target_version;
                config
            }
            Command::Memory(args) => {
                let mut config = args.common.into_config(OutputFormat::Memory);
                config.memory = MemoryConfig {
                    top: args.top,
                    min_bytes: args.min_bytes,
                    seed: args.seed,
                };
                config
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let main_cli = MainCli::parse();

    let default_directive = if main_cli.verbose { "debug" } else { "info" };
    let level = EnvFilter::builder()
        .with_default_directive(default_directive.parse().context("Failed to parse level")?)
        .from_env()
        .context("Failed to parse RUST_LOG")?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(level)
        .init();

    let config = main_cli.command.into_config();
    config.validate().context("Invalid configuration")?;

    let summary = export(config, ModuleParserRegistry::default()).await?;
    info!(
        operation = "summary",
        version = summary.version,
        keys = summary.keys,
        skipped = summary.skipped,
        aux_fields = summary.aux_fields,
        tail_bytes = summary.tail_bytes,
        "Done"
    );
    Ok(())
}
