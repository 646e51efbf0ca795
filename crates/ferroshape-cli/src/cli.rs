//! CLI argument definitions.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chat` | Run one structured chat exchange and print the envelope |
//! | `prompt` | Print the system prompt and request format for a schema |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--host` | `$OLLAMA_HOST` or `http://localhost:11434` | Chat server base URL |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--timeout-ms` | `$FERROSHAPE_TIMEOUT_MS` or none | Per-request timeout |
//! | `--log-level` | `$RUST_LOG` or `warn` | Tracing filter directive |
//!
//! # Examples
//!
//! ```bash
//! ferroshape chat --model llama3.1 --schema person.json --message "Jason is 30."
//! ferroshape chat --model llama3.1 --schema person.json --message "..." --mode reasoning --stream
//! ferroshape prompt --schema person.json --mode schema
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ferroshape_core::OutputMode;

/// Schema-validated structured output from local chat models.
#[derive(Debug, Parser)]
#[command(name = "ferroshape", author, version, about)]
pub struct Cli {
    /// Base URL of the Ollama-compatible server.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Log filter, e.g. `info` or `ferroshape_core=debug`. Logs go to stderr.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask the model for data matching a JSON Schema.
    Chat(ChatArgs),
    /// Show what the model would be told for a schema.
    Prompt(PromptArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Model name, e.g. `llama3.1`.
    #[arg(long)]
    pub model: String,

    /// Path to a JSON Schema document with an object root.
    #[arg(long)]
    pub schema: PathBuf,

    /// User message. Repeat for several.
    #[arg(long = "message", short = 'm', required = true)]
    pub messages: Vec<String>,

    /// Leading system message. Replaces the generated instruction.
    #[arg(long)]
    pub system: Option<String>,

    /// Maximum number of attempts.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Return a repaired result instead of failing when retries run out.
    #[arg(long, default_value_t = false)]
    pub allow_partial: bool,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Emit NDJSON stream events instead of one envelope.
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// Model option as `key=value`; values are read as JSON when possible.
    #[arg(long = "option", short = 'o')]
    pub options: Vec<String>,

    /// How long the server keeps the model loaded, e.g. `5m`.
    #[arg(long)]
    pub keep_alive: Option<String>,
}

#[derive(Debug, Args)]
pub struct PromptArgs {
    #[arg(long)]
    pub schema: PathBuf,

    #[arg(long, value_enum, default_value_t = ModeArg::Json)]
    pub mode: ModeArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Json,
    Schema,
    Reasoning,
}

impl From<ModeArg> for OutputMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Json => OutputMode::Json,
            ModeArg::Schema => OutputMode::Schema,
            ModeArg::Reasoning => OutputMode::Reasoning,
        }
    }
}
