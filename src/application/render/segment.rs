//! Delimiter-aware splitting of text into plain-text and math spans.
//!
//! Segmentation is total: malformed delimiter usage degrades to plain text and
//! never produces an error.

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix that makes a math span hand its delimiters through to the backend.
const ENVIRONMENT_PREFIX: &str = "\\begin{";

/// A left/right marker pair bounding a math span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter {
    pub left: String,
    pub right: String,
    /// Typeset as display (block) math rather than inline.
    pub display: bool,
}

impl Delimiter {
    pub fn new(left: impl Into<String>, right: impl Into<String>, display: bool) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            display,
        }
    }
}

/// Ordered delimiter table with its left-marker search compiled once.
///
/// Declaration order is the tie-break when several left markers start at the
/// same position, so `$$` must be declared before `$` to win.
#[derive(Debug, Clone)]
pub struct DelimiterSet {
    delimiters: Vec<Delimiter>,
    left_markers: Option<Regex>,
}

static STANDARD_DELIMITERS: Lazy<DelimiterSet> = Lazy::new(|| {
    DelimiterSet::new(vec![
        Delimiter::new("$$", "$$", true),
        Delimiter::new("$", "$", false),
    ])
});

impl DelimiterSet {
    pub fn new(delimiters: Vec<Delimiter>) -> Self {
        // Empty left markers would match everywhere without consuming input.
        let alternatives: Vec<String> = delimiters
            .iter()
            .filter(|delimiter| !delimiter.left.is_empty())
            .map(|delimiter| regex::escape(&delimiter.left))
            .collect();

        let left_markers = if alternatives.is_empty() {
            None
        } else {
            // Escaped literals joined by `|` always form a valid pattern.
            Regex::new(&format!("({})", alternatives.join("|"))).ok()
        };

        Self {
            delimiters,
            left_markers,
        }
    }

    /// The fixed table used for previews: display `$$…$$`, then inline `$…$`.
    pub fn standard() -> &'static DelimiterSet {
        &STANDARD_DELIMITERS
    }

    pub fn delimiters(&self) -> &[Delimiter] {
        &self.delimiters
    }

    fn find_left(&self, text: &str) -> Option<usize> {
        self.left_markers
            .as_ref()
            .and_then(|regex| regex.find(text))
            .map(|found| found.start())
    }

    fn opening_at(&self, text: &str) -> Option<&Delimiter> {
        self.delimiters
            .iter()
            .find(|delimiter| !delimiter.left.is_empty() && text.starts_with(&delimiter.left))
    }
}

/// A contiguous run of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text {
        data: String,
    },
    Math {
        /// Content handed to the math backend.
        data: String,
        /// The span as written, delimiters included.
        raw_data: String,
        display: bool,
    },
}

impl Span {
    pub fn text(data: impl Into<String>) -> Self {
        Span::Text { data: data.into() }
    }

    pub fn is_math(&self) -> bool {
        matches!(self, Span::Math { .. })
    }

    /// The text this span contributes before rendering.
    pub fn data(&self) -> &str {
        match self {
            Span::Text { data } | Span::Math { data, .. } => data,
        }
    }

    /// The original source slice covered by this span.
    pub fn source(&self) -> &str {
        match self {
            Span::Text { data } => data,
            Span::Math { raw_data, .. } => raw_data,
        }
    }
}

/// Split `text` into ordered text and math spans.
pub fn segment(text: &str, delimiters: &DelimiterSet) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut rest = text;

    while let Some(index) = delimiters.find_left(rest) {
        if index > 0 {
            spans.push(Span::text(&rest[..index]));
            rest = &rest[index..];
        }

        let Some(delimiter) = delimiters.opening_at(rest) else {
            break;
        };

        let Some(end) = find_end_of_math(&delimiter.right, rest, delimiter.left.len()) else {
            // Unterminated: the marker and everything after it stay plain text,
            // joined onto the run emitted just before it.
            if let Some(Span::Text { data }) = spans.last_mut() {
                data.push_str(rest);
                return spans;
            }
            break;
        };

        let consumed = end + delimiter.right.len();
        let raw_data = &rest[..consumed];
        let data = if raw_data.starts_with(ENVIRONMENT_PREFIX) {
            raw_data
        } else {
            &rest[delimiter.left.len()..end]
        };

        spans.push(Span::Math {
            data: data.to_string(),
            raw_data: raw_data.to_string(),
            display: delimiter.display,
        });
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        spans.push(Span::text(rest));
    }

    spans
}

/// Byte index of the closing marker, scanning from `start` with brace-depth
/// tracking. A backslash skips the following character.
fn find_end_of_math(right: &str, text: &str, start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut chars = text[start..].char_indices().map(|(offset, ch)| (start + offset, ch));

    while let Some((index, ch)) = chars.next() {
        if depth <= 0 && text[index..].starts_with(right) {
            return Some(index);
        }
        match ch {
            '\\' => {
                chars.next();
            }
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }

    None
}
