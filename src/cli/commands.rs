use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "agent-dispatch")]
#[command(author, version, about = "Delegate coding tasks to coding-agent CLIs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Path to config.toml (default: <repo>/.agent-dispatch/config.toml)
    #[arg(long, global = true, env = "AGENT_DISPATCH_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Output format for CLI results.
/// - Text: Human-readable text output (default)
/// - Json: Single JSON object at completion
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single quick task
    Run {
        /// Task description
        task: String,

        /// Repository root (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Backend to use (aider, opencode)
        #[arg(short, long)]
        backend: Option<String>,

        /// Model override
        #[arg(short, long)]
        model: Option<String>,

        /// Glob the backend may modify (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// File passed to the backend as context (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,

        /// Maximum run time in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Use the full instruction mode instead of quick
        #[arg(long)]
        full: bool,
    },

    /// Execute a plan file (JSON or TOML list of steps)
    Plan {
        /// Plan file
        file: PathBuf,

        /// Repository root (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Backend to use (aider, opencode)
        #[arg(short, long)]
        backend: Option<String>,

        /// Model override
        #[arg(short, long)]
        model: Option<String>,

        /// Run all steps in one backend invocation
        #[arg(long)]
        parallel: bool,

        /// Concurrent workers requested from the backend (parallel only)
        #[arg(long, requires = "parallel")]
        fanout: Option<usize>,
    },

    /// List registered backends and their capabilities
    Backends,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show effective configuration (credentials masked)
    Show,
    /// Print the configuration file path
    Path,
    /// Write default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
