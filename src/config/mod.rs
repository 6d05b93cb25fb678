//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::language::resolve_supported_language;

mod cli;

pub use cli::{
    CliArgs, Command, ContextArgs, LoggingOverrides, PreviewOverrides, RenderArgs, WatchArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "altsia-preview";
const ENV_PREFIX: &str = "ALTSIA";
pub(crate) const DEFAULT_EXTENSION: &str = "alt";
pub(crate) const DEFAULT_FONT_SIZE: u16 = 14;
pub(crate) const DEFAULT_STYLESHEET_HREF: &str = "katex/katex.min.css";
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const MAX_FONT_SIZE: u16 = 96;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub preview: PreviewSettings,
    pub watch: WatchSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    /// Extension without the leading dot.
    pub extension: String,
    pub font_size: u16,
    pub stylesheet_href: String,
    pub display_language: String,
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub poll_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_logging_overrides(&cli.logging);
    match &cli.command {
        Command::Render(args) => raw.apply_preview_overrides(&args.preview),
        Command::Watch(args) => {
            raw.apply_preview_overrides(&args.preview);
            raw.apply_watch_overrides(args);
        }
        Command::Context(args) => {
            if let Some(extension) = args.extension.as_ref() {
                raw.preview.extension = Some(extension.clone());
            }
        }
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    preview: RawPreviewSettings,
    watch: RawWatchSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_preview_overrides(&mut self, overrides: &PreviewOverrides) {
        if let Some(extension) = overrides.extension.as_ref() {
            self.preview.extension = Some(extension.clone());
        }
        if let Some(size) = overrides.font_size {
            self.preview.font_size = Some(size);
        }
        if let Some(href) = overrides.stylesheet_href.as_ref() {
            self.preview.stylesheet_href = Some(href.clone());
        }
        if let Some(language) = overrides.display_language.as_ref() {
            self.preview.display_language = Some(language.clone());
        }
    }

    fn apply_watch_overrides(&mut self, args: &WatchArgs) {
        if let Some(millis) = args.poll_interval_ms {
            self.watch.poll_interval_ms = Some(millis);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            preview,
            watch,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let preview = build_preview_settings(preview)?;
        let watch = build_watch_settings(watch)?;

        Ok(Self {
            logging,
            preview,
            watch,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let extension = match preview.extension {
        Some(value) => {
            let trimmed = value.trim().trim_start_matches('.');
            if trimmed.is_empty() {
                return Err(LoadError::invalid("preview.extension", "must not be empty"));
            }
            if trimmed.contains(['/', '\\']) {
                return Err(LoadError::invalid(
                    "preview.extension",
                    "must not contain path separators",
                ));
            }
            trimmed.to_string()
        }
        None => DEFAULT_EXTENSION.to_string(),
    };

    let font_size = preview.font_size.unwrap_or(DEFAULT_FONT_SIZE);
    if font_size == 0 || font_size > MAX_FONT_SIZE {
        return Err(LoadError::invalid(
            "preview.font_size",
            format!("must be between 1 and {MAX_FONT_SIZE}"),
        ));
    }

    let stylesheet_href = preview
        .stylesheet_href
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| DEFAULT_STYLESHEET_HREF.to_string());

    let display_language =
        resolve_supported_language(preview.display_language.as_deref().unwrap_or_default());

    Ok(PreviewSettings {
        extension,
        font_size,
        stylesheet_href,
        display_language,
    })
}

fn build_watch_settings(watch: RawWatchSettings) -> Result<WatchSettings, LoadError> {
    let millis = watch.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if millis == 0 {
        return Err(LoadError::invalid(
            "watch.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(WatchSettings {
        poll_interval: Duration::from_millis(millis),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    extension: Option<String>,
    font_size: Option<u16>,
    stylesheet_href: Option<String>,
    display_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatchSettings {
    poll_interval_ms: Option<u64>,
}
