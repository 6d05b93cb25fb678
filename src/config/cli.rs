use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the altsia-preview binary.
#[derive(Debug, Parser)]
#[command(
    name = "altsia-preview",
    version,
    about = "Live HTML preview for Altsia documents"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "ALTSIA_PREVIEW_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a document once and write the preview page.
    Render(RenderArgs),
    /// Keep a preview bound to a document and re-render whenever it changes.
    Watch(WatchArgs),
    /// Print the context snapshot collected for a document as JSON.
    Context(ContextArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct PreviewOverrides {
    /// Override the extension of previewable documents.
    #[arg(long = "extension", value_name = "EXT")]
    pub extension: Option<String>,

    /// Override the body font size in pixels.
    #[arg(long = "font-size", value_name = "PX")]
    pub font_size: Option<u16>,

    /// Override the KaTeX stylesheet reference embedded in the page.
    #[arg(long = "stylesheet-href", value_name = "HREF")]
    pub stylesheet_href: Option<String>,

    /// Override the display language handed to the markup engine.
    #[arg(long = "display-language", value_name = "CODE")]
    pub display_language: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Document to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Write the page here instead of standard output.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Workspace folder used for context collection; defaults to the document's directory.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub workspace: Option<PathBuf>,

    #[command(flatten)]
    pub preview: PreviewOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    /// Document to watch.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// File the preview page is rewritten to after every render.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Workspace folder used for context collection; defaults to the document's directory.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub workspace: Option<PathBuf>,

    /// Override the polling interval in milliseconds.
    #[arg(long = "poll-interval-ms", value_name = "MILLIS")]
    pub poll_interval_ms: Option<u64>,

    #[command(flatten)]
    pub preview: PreviewOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ContextArgs {
    /// Document whose context is collected.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Workspace folder to enumerate; defaults to the document's directory.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub workspace: Option<PathBuf>,

    /// Override the extension of previewable documents.
    #[arg(long = "extension", value_name = "EXT")]
    pub extension: Option<String>,
}

impl Command {
    pub fn file(&self) -> &PathBuf {
        match self {
            Command::Render(args) => &args.file,
            Command::Watch(args) => &args.file,
            Command::Context(args) => &args.file,
        }
    }

    pub fn workspace(&self) -> Option<&PathBuf> {
        match self {
            Command::Render(args) => args.workspace.as_ref(),
            Command::Watch(args) => args.workspace.as_ref(),
            Command::Context(args) => args.workspace.as_ref(),
        }
    }
}
