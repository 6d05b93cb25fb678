//! The preview surface and the static page published to it.

use std::sync::Arc;

use askama::Template;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    #[error("failed to create preview surface: {message}")]
    Create { message: String },
    #[error("failed to publish preview: {message}")]
    Publish { message: String },
    #[error("failed to render preview page: {message}")]
    Template { message: String },
}

impl SurfaceError {
    pub fn create(message: impl Into<String>) -> Self {
        Self::Create {
            message: message.into(),
        }
    }

    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }
}

/// One complete update of the surface: page markup plus the status figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    pub title: String,
    pub html: String,
    pub word_count: usize,
}

impl PreviewFrame {
    pub fn status_text(&self) -> String {
        format!("{} words", self.word_count)
    }
}

/// A live, render-only preview panel owned by the host.
pub trait PreviewSurface: Send + Sync {
    fn id(&self) -> Uuid;
    /// Bring the surface to the front.
    fn reveal(&self);
    fn set_title(&self, title: &str);
    fn publish(&self, frame: PreviewFrame) -> Result<(), SurfaceError>;
    /// True once the user has closed the surface.
    fn is_disposed(&self) -> bool;
}

pub trait SurfaceHost: Send + Sync {
    fn create_surface(&self, title: &str) -> Result<Arc<dyn PreviewSurface>, SurfaceError>;
}

/// Presentation settings shared by every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStyle {
    pub stylesheet_href: String,
    pub font_size: u16,
}

#[derive(Template)]
#[template(path = "preview.html")]
struct PreviewPage<'a> {
    lang: &'a str,
    title: &'a str,
    stylesheet_href: &'a str,
    font_size: u16,
    error: Option<&'a str>,
    body: &'a str,
}

/// Wrap sanitised body markup in the static preview document.
pub fn render_page(
    style: &PageStyle,
    lang: &str,
    title: &str,
    body: &str,
    error: Option<&str>,
) -> Result<String, SurfaceError> {
    PreviewPage {
        lang,
        title,
        stylesheet_href: &style.stylesheet_href,
        font_size: style.font_size,
        error,
        body: body.trim_end(),
    }
    .render()
    .map_err(|err| SurfaceError::Template {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> PageStyle {
        PageStyle {
            stylesheet_href: "katex.min.css".into(),
            font_size: 14,
        }
    }

    #[test]
    fn renders_static_page() {
        let page = render_page(&style(), "en", "Preview a.alt", "<p>Hello</p>\n", None)
            .expect("page renders");
        insta::assert_snapshot!(page, @r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
        <meta charset="utf-8">
        <meta name="viewport" content="width=device-width, initial-scale=1">
        <meta http-equiv="Content-Security-Policy" content="script-src 'none'">
        <title>Preview a.alt</title>
        <link rel="stylesheet" href="katex.min.css">
        <style>body { font-size: 14px; }</style>
        </head>
        <body>
        <main class="preview-body">
        <p>Hello</p>
        </main>
        </body>
        </html>
        "#);
    }

    #[test]
    fn error_banner_is_escaped_and_precedes_body() {
        let page = render_page(
            &style(),
            "en",
            "Preview a.alt",
            "<p>last good</p>",
            Some("KaTeX rendering failed: <bad>"),
        )
        .expect("page renders");

        let banner = page.find("preview-error").expect("banner present");
        let body = page.find("<p>last good</p>").expect("body present");
        assert!(banner < body);
        assert!(!page.contains("<bad>"));
        assert!(page.contains("KaTeX rendering failed: &#60;bad&#62;"));
    }

    #[test]
    fn status_text_counts_words() {
        let frame = PreviewFrame {
            title: String::new(),
            html: String::new(),
            word_count: 42,
        };
        assert_eq!(frame.status_text(), "42 words");
    }
}
