//! The seam between the preview core and the markup engine.
//!
//! The engine owns the document grammar. It calls back into a [`RenderPass`]
//! for every text run it meets and for the capabilities it needs (file reads,
//! single-expression math), and returns the finished body markup.

use std::path::PathBuf;

use async_trait::async_trait;
use comrak::{
    Arena, Options, format_html,
    nodes::{AstNode, NodeValue},
    parse_document,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::{
    math::{MathError, MathRenderer},
    rewrite::TextRewriter,
};

/// One sibling document made available for cross-document references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub id: String,
    pub content: String,
}

/// Read-only view of the workspace handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub active_document_id: String,
    pub documents: Vec<SnapshotDocument>,
}

impl ContextSnapshot {
    pub fn document(&self, id: &str) -> Option<&SnapshotDocument> {
        self.documents.iter().find(|document| document.id == id)
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("file reads are only supported for local file documents, not `{uri}`")]
    NonLocalDocument { uri: String },
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Math(#[from] MathError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("markup engine failed: {message}")]
    Engine { message: String },
}

impl EngineError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

/// Host services the engine may call while rendering.
pub trait Capabilities {
    /// Read a file relative to the directory of the source document.
    fn read(&self, relative_path: &str) -> Result<String, CapabilityError>;
    fn render_inline(&mut self, tex: &str) -> Result<String, MathError>;
    fn render_display(&mut self, tex: &str) -> Result<String, MathError>;
}

/// State owned by exactly one render pass.
///
/// Each pass starts from an empty macro table and a zero accumulator, so
/// passes never observe each other even when they overlap.
#[derive(Debug)]
pub struct RenderPass {
    rewriter: TextRewriter,
    source: Url,
}

impl RenderPass {
    pub fn new(math: MathRenderer, source: Url) -> Self {
        let mut rewriter = TextRewriter::new(math);
        rewriter.reset();
        Self { rewriter, source }
    }

    /// The text rewrite callback.
    pub fn rewrite(&mut self, text: &str) -> Result<String, MathError> {
        self.rewriter.rewrite(text)
    }

    /// The text rewrite callback with plain runs emitted by `write_text`.
    pub fn rewrite_with<F>(&mut self, text: &str, write_text: F) -> Result<String, MathError>
    where
        F: FnMut(&mut String, &str),
    {
        self.rewriter.rewrite_with(text, write_text)
    }

    pub fn visited_len(&self) -> usize {
        self.rewriter.visited_len()
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn rewriter(&self) -> &TextRewriter {
        &self.rewriter
    }
}

impl Capabilities for RenderPass {
    fn read(&self, relative_path: &str) -> Result<String, CapabilityError> {
        let source_path = (self.source.scheme() == "file")
            .then(|| self.source.to_file_path().ok())
            .flatten()
            .ok_or_else(|| CapabilityError::NonLocalDocument {
                uri: self.source.to_string(),
            })?;

        let base = source_path.parent().map(PathBuf::from).unwrap_or_default();
        let path = base.join(relative_path);
        std::fs::read_to_string(&path).map_err(|source| CapabilityError::Read { path, source })
    }

    fn render_inline(&mut self, tex: &str) -> Result<String, MathError> {
        self.rewriter.math_mut().render_expression(tex, false)
    }

    fn render_display(&mut self, tex: &str) -> Result<String, MathError> {
        self.rewriter.math_mut().render_expression(tex, true)
    }
}

/// Input for one engine invocation.
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub source: &'a str,
    pub snapshot: &'a ContextSnapshot,
    pub display_language: &'a str,
}

/// The markup engine: source text in, body markup out.
#[async_trait]
pub trait MarkupEngine: Send + Sync {
    async fn render(
        &self,
        input: EngineInput<'_>,
        pass: &mut RenderPass,
    ) -> Result<String, EngineError>;
}

/// CommonMark engine built on comrak.
///
/// Dollar math is left to the rewrite callback, so every text run, math
/// delimiters included, is segmented and counted there. Math nodes the parser
/// produces on its own go to the inline and display entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComrakEngine;

#[async_trait]
impl MarkupEngine for ComrakEngine {
    async fn render(
        &self,
        input: EngineInput<'_>,
        pass: &mut RenderPass,
    ) -> Result<String, EngineError> {
        render_commonmark(input.source, pass)
    }
}

fn comrak_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.render.r#unsafe = true;
    options
}

/// Text nodes are spliced back as raw HTML, so their plain runs are escaped here.
fn escape_text(html: &mut String, text: &str) {
    // Writing into a String cannot fail.
    let _ = comrak::html::escape(html, text);
}

fn render_commonmark(source: &str, pass: &mut RenderPass) -> Result<String, EngineError> {
    let options = comrak_options();
    let arena = Arena::new();
    let root = parse_document(&arena, source, &options);

    let nodes: Vec<&AstNode<'_>> = root.descendants().collect();
    for node in nodes {
        let replacement = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => Some(pass.rewrite_with(text, escape_text)?),
                NodeValue::Math(math) if math.display_math => {
                    Some(pass.render_display(&math.literal)?)
                }
                NodeValue::Math(math) => Some(pass.render_inline(&math.literal)?),
                _ => None,
            }
        };
        if let Some(html) = replacement {
            node.data.borrow_mut().value = NodeValue::HtmlInline(html);
        }
    }

    let mut html = String::new();
    format_html(root, &options, &mut html).map_err(|err| EngineError::engine(err.to_string()))?;
    Ok(html)
}
