//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;

#[derive(Parser)]
#[command(
    name = "cascade",
    about = "Cascade - transactional multi-provider action engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Manifest with providers and actions
    #[arg(
        long,
        short = 'c',
        env = "CASCADE_CONFIG",
        default_value = "./cascade.yaml",
        help = "Path to the YAML or JSON manifest"
    )]
    pub config: String,

    /// Disable colored output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile an action and print the result
    Compile {
        /// Action name from the manifest, or a definition file with --file
        #[arg(help = "Action name as defined in the manifest")]
        action: Option<String>,

        /// Standalone definition file (YAML or JSON)
        #[arg(long, conflicts_with = "action", help = "Compile a standalone definition file")]
        file: Option<String>,

        #[arg(long, value_enum, default_value = "pretty", help = "Output format")]
        format: OutputFormat,
    },

    /// Execute an action from the manifest
    Run {
        #[arg(help = "Action name as defined in the manifest")]
        action: String,

        /// Input data as JSON string
        #[arg(short, long, help = "Input data as JSON string")]
        input: Option<String>,

        #[arg(
            long,
            conflicts_with = "input",
            help = "Read input data from file (JSON or YAML)"
        )]
        input_file: Option<String>,

        /// Session data as JSON string (`{"context": {...}}`)
        #[arg(long, env = "CASCADE_SESSION", help = "Session data as JSON string")]
        session: Option<String>,

        #[arg(long, conflicts_with = "session", help = "Read session data from file")]
        session_file: Option<String>,

        #[arg(long, value_enum, default_value = "pretty", help = "Output format")]
        format: OutputFormat,

        /// Save output to file
        #[arg(long, help = "Save output to file")]
        output: Option<String>,

        /// Include phase timings and sub-action results
        #[arg(long, help = "Include diagnostics in the output")]
        diagnostics: bool,

        /// Timeout in seconds
        #[arg(long, default_value = "30", help = "Execution timeout in seconds")]
        timeout: u64,
    },

    /// List providers and actions of the manifest
    List {
        #[arg(long, value_enum, default_value = "table", help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// Pretty-printed JSON
    Pretty,
    /// Compact JSON
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Format a JSON value according to the output format
    pub fn format_json(&self, value: &JsonValue) -> crate::error::CliResult<String> {
        Ok(match self {
            // tables are rendered by the commands that support them
            Self::Table | Self::Pretty => serde_json::to_string_pretty(value)?,
            Self::Json => serde_json::to_string(value)?,
            Self::Yaml => serde_yaml::to_string(value)?,
        })
    }
}
