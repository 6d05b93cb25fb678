use super::{
    math::{MathError, MathRenderer},
    segment::{DelimiterSet, Span, segment},
};

/// The "render this text chunk" callback handed to the markup engine.
///
/// Besides rendering, it tallies the length of every chunk it visits; the
/// total is the word-count figure shown next to the preview.
#[derive(Debug, Clone)]
pub struct TextRewriter {
    math: MathRenderer,
    delimiters: &'static DelimiterSet,
    visited_len: usize,
}

impl TextRewriter {
    pub fn new(math: MathRenderer) -> Self {
        Self::with_delimiters(math, DelimiterSet::standard())
    }

    pub fn with_delimiters(math: MathRenderer, delimiters: &'static DelimiterSet) -> Self {
        Self {
            math,
            delimiters,
            visited_len: 0,
        }
    }

    /// Render math spans in `text`, leaving plain runs untouched.
    pub fn rewrite(&mut self, text: &str) -> Result<String, MathError> {
        self.rewrite_with(text, |html, data| html.push_str(data))
    }

    /// Like [`rewrite`](Self::rewrite), but plain runs are emitted through
    /// `write_text`, so an engine can escape them for its output format.
    ///
    /// The accumulator counts UTF-16 code units of the whole chunk, math
    /// source included.
    pub fn rewrite_with<F>(&mut self, text: &str, mut write_text: F) -> Result<String, MathError>
    where
        F: FnMut(&mut String, &str),
    {
        self.visited_len += text.encode_utf16().count();

        let mut html = String::with_capacity(text.len());
        for span in segment(text, self.delimiters) {
            match span {
                Span::Text { data } => write_text(&mut html, &data),
                Span::Math { data, display, .. } => {
                    html.push_str(&self.math.render_span(&data, display)?);
                }
            }
        }
        Ok(html)
    }

    /// Start a new pass: zero the accumulator and clear the macro table.
    pub fn reset(&mut self) {
        self.visited_len = 0;
        self.math.reset_macros();
    }

    pub fn visited_len(&self) -> usize {
        self.visited_len
    }

    pub fn math(&self) -> &MathRenderer {
        &self.math
    }

    pub fn math_mut(&mut self) -> &mut MathRenderer {
        &mut self.math
    }
}
