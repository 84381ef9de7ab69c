use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the contextdocs binary.
#[derive(Debug, Parser)]
#[command(
    name = "contextdocs",
    version,
    about = "Local two-tier cache for fetched library documentation"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CONTEXTDOCS_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the background maintainer until interrupted.
    Maintain(MaintainArgs),
    /// Print cache statistics as JSON.
    Stats,
    /// Remove entries by library, pattern or everything; expired entries by default.
    Invalidate(InvalidateArgs),
    /// Print a cached payload to stdout.
    Get(LookupArgs),
    /// Store a file as the payload for a request.
    Put(PutArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the durable cache file location.
    #[arg(
        long = "cache-path",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub cache_path: Option<PathBuf>,

    /// Run without the durable tier.
    #[arg(long = "no-durable", global = true)]
    pub no_durable: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MaintainArgs {
    /// Override the interval between maintenance cycles.
    #[arg(long = "interval-secs", value_name = "SECONDS")]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InvalidateArgs {
    /// Remove every entry for this library.
    #[arg(long, value_name = "ID", conflicts_with_all = ["pattern", "all"])]
    pub library: Option<String>,

    /// Remove entries matching `<library-glob>[:<topic-glob>]`.
    #[arg(long, value_name = "GLOB", conflicts_with = "all")]
    pub pattern: Option<String>,

    /// Remove everything from both tiers.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub all: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LookupArgs {
    /// Library identifier, e.g. `reactjs` or `/vercel/next.js`.
    #[arg(long, value_name = "ID")]
    pub library: String,

    /// Documentation topic; blank means `default`.
    #[arg(long, value_name = "TOPIC", default_value = "")]
    pub topic: String,

    /// Token budget of the request.
    #[arg(long, value_name = "COUNT")]
    pub tokens: u32,

    /// Extra request context as a JSON document.
    #[arg(long, value_name = "JSON")]
    pub context: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PutArgs {
    #[command(flatten)]
    pub lookup: LookupArgs,

    /// Content type recorded in the entry metadata.
    #[arg(long = "content-type", value_name = "MIME")]
    pub content_type: Option<String>,

    /// File holding the payload.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}
