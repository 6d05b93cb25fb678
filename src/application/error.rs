use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::preview::{ContextError, SurfaceError},
    infra::error::InfraError,
};

/// An error flattened into its chain of messages for reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// `outer: inner: innermost`, skipping causes already quoted by their parent.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        for message in &self.messages {
            if summary.contains(message.as_str()) {
                continue;
            }
            if !summary.is_empty() {
                summary.push_str(": ");
            }
            summary.push_str(message);
        }
        summary
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_) | AppError::Infra(InfraError::Configuration { .. }) => 2,
            AppError::Infra(_)
            | AppError::Context(_)
            | AppError::Surface(_)
            | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = AppError::from(InfraError::from(io));
        let report = err.report();
        assert_eq!(report.messages, vec!["io error: gone", "gone"]);
        assert_eq!(report.summary(), "io error: gone");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn validation_exits_with_usage_status() {
        assert_eq!(AppError::validation("bad flag").exit_code(), 2);
        assert_eq!(
            AppError::validation("bad flag").report().summary(),
            "validation failed: bad flag"
        );
    }
}
