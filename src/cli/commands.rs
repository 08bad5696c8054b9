use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sandflow",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_TIMESTAMP"), ")"),
    about = "Run step pipelines against disposable sandboxed workspaces"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline against one or more sources
    Run(RunArgs),
    /// Validate a pipeline file
    Validate(ValidateArgs),
    /// Print content digests of files
    Hash(HashArgs),
    /// Print the cache key for a step invocation
    Key(KeyArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Pipeline YAML file
    #[arg(short, long)]
    pub config: String,

    /// Sources to run against: repository URL, local path, or '-' for an
    /// empty workspace
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Run identifier (single source only)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Input handed to the first step, as JSON
    #[arg(long)]
    pub input: Option<String>,

    /// Directory for per-run audit trails
    #[arg(short, long)]
    pub output: Option<String>,

    /// Override the sandbox base directory
    #[arg(long)]
    pub sandbox_dir: Option<String>,

    /// Annotate steps not reached after an early stop as skipped
    #[arg(long)]
    pub mark_skipped: bool,

    /// Print run reports as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Pipeline file to validate
    pub config: String,
}

#[derive(Args, Clone)]
pub struct HashArgs {
    /// Files or directories to hash
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args, Clone)]
pub struct KeyArgs {
    /// Step name
    pub step: String,

    /// Run identifier; omit for the run-independent memo key
    #[arg(long)]
    pub run_id: Option<String>,

    /// Step input as JSON (bare text is taken as a string)
    #[arg(long)]
    pub input: Option<String>,

    /// Step configuration as JSON
    #[arg(long)]
    pub config: Option<String>,
}
