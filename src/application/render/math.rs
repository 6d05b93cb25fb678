use std::{collections::BTreeMap, sync::Arc};

use katex::{OptsBuilder, OutputType};
use thiserror::Error;

/// Failure reported by a math backend for a single expression.
#[derive(Debug, Clone, Error)]
pub enum MathError {
    #[error("failed to build KaTeX options: {message}")]
    Options { message: String },
    #[error("KaTeX rendering failed: {message}")]
    Render { message: String },
}

/// User-defined macros visible to every expression of one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    entries: BTreeMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, expansion: impl Into<String>) {
        self.entries.insert(name.into(), expansion.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, expansion)| (name.as_str(), expansion.as_str()))
    }

    /// Record the definitions `tex` makes so later expressions can use them.
    ///
    /// Every definition is global, matching KaTeX's `globalGroup` behaviour.
    /// `\providecommand` only applies when the name is still undefined.
    pub fn absorb(&mut self, tex: &str) {
        let mut cursor = MacroScanner::new(tex);
        while let Some(definition) = cursor.next_definition() {
            if definition.provide_only && self.entries.contains_key(&definition.name) {
                continue;
            }
            self.entries.insert(definition.name, definition.expansion);
        }
    }
}

struct MacroDefinition {
    name: String,
    expansion: String,
    provide_only: bool,
}

struct MacroScanner<'a> {
    tex: &'a str,
    pos: usize,
}

impl<'a> MacroScanner<'a> {
    fn new(tex: &'a str) -> Self {
        Self { tex, pos: 0 }
    }

    fn next_definition(&mut self) -> Option<MacroDefinition> {
        while self.pos < self.tex.len() {
            let Some(offset) = self.tex[self.pos..].find('\\') else {
                self.pos = self.tex.len();
                return None;
            };
            self.pos += offset;
            let command = self.control_sequence()?;
            let definition = match command {
                "\\def" | "\\gdef" | "\\edef" | "\\xdef" => self.tex_definition(),
                "\\newcommand" | "\\renewcommand" => self.latex_definition(false),
                "\\providecommand" => self.latex_definition(true),
                _ => None,
            };
            if definition.is_some() {
                return definition;
            }
        }
        None
    }

    /// Consume `\name` (or a single-symbol control sequence) at the cursor.
    fn control_sequence(&mut self) -> Option<&'a str> {
        let rest = &self.tex[self.pos..];
        let mut chars = rest.char_indices().skip(1);
        let (_, first) = chars.next()?;
        let len = if first.is_ascii_alphabetic() {
            rest[1..]
                .find(|ch: char| !ch.is_ascii_alphabetic())
                .map_or(rest.len(), |end| end + 1)
        } else {
            1 + first.len_utf8()
        };
        self.pos += len;
        Some(&rest[..len])
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.tex[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// `\def\name#1#2{body}`
    fn tex_definition(&mut self) -> Option<MacroDefinition> {
        self.skip_whitespace();
        if !self.tex[self.pos..].starts_with('\\') {
            return None;
        }
        let name = self.control_sequence()?.to_string();
        let params_end = self.tex[self.pos..].find('{')?;
        self.pos += params_end;
        let expansion = self.group()?;
        Some(MacroDefinition {
            name,
            expansion,
            provide_only: false,
        })
    }

    /// `\newcommand{\name}[n]{body}` or `\newcommand\name{body}`
    fn latex_definition(&mut self, provide_only: bool) -> Option<MacroDefinition> {
        self.skip_whitespace();
        let name = if self.tex[self.pos..].starts_with('{') {
            self.group()?.trim().to_string()
        } else {
            self.control_sequence()?.to_string()
        };
        if !name.starts_with('\\') {
            return None;
        }
        self.skip_whitespace();
        while self.tex[self.pos..].starts_with('[') {
            let close = self.tex[self.pos..].find(']')?;
            self.pos += close + 1;
            self.skip_whitespace();
        }
        if !self.tex[self.pos..].starts_with('{') {
            return None;
        }
        let expansion = self.group()?;
        Some(MacroDefinition {
            name,
            expansion,
            provide_only,
        })
    }

    /// Consume a balanced `{…}` group at the cursor and return its contents.
    fn group(&mut self) -> Option<String> {
        let rest = &self.tex[self.pos..];
        let mut depth = 0usize;
        let mut chars = rest.char_indices();
        while let Some((index, ch)) = chars.next() {
            match ch {
                '\\' => {
                    chars.next();
                }
                '{' => depth += 1,
                '}' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        self.pos += index + 1;
                        return Some(rest[1..index].to_string());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Typesets one TeX expression into markup.
pub trait MathBackend: Send + Sync {
    fn render(&self, tex: &str, display: bool, macros: &MacroTable) -> Result<String, MathError>;
}

/// KaTeX via the embedded JavaScript engine, emitting HTML only.
#[derive(Debug, Clone, Default)]
pub struct KatexBackend;

impl MathBackend for KatexBackend {
    fn render(&self, tex: &str, display: bool, macros: &MacroTable) -> Result<String, MathError> {
        let mut builder = OptsBuilder::default();
        builder.display_mode(display);
        builder.output_type(OutputType::Html);
        builder.throw_on_error(true);
        builder.trust(true);
        let mut opts = builder.build().map_err(|err| MathError::Options {
            message: err.to_string(),
        })?;
        for (name, expansion) in macros.iter() {
            opts.add_macro(name.to_string(), expansion.to_string());
        }

        katex::render_with_opts(tex, opts).map_err(|err| MathError::Render {
            message: err.to_string(),
        })
    }
}

/// Math render adapter: a backend plus the macro table of the current pass.
#[derive(Clone)]
pub struct MathRenderer {
    backend: Arc<dyn MathBackend>,
    macros: MacroTable,
}

impl MathRenderer {
    pub fn new(backend: Arc<dyn MathBackend>) -> Self {
        Self {
            backend,
            macros: MacroTable::new(),
        }
    }

    /// Render a span produced by segmentation. Definitions it makes become
    /// visible to later spans.
    pub fn render_span(&mut self, data: &str, display: bool) -> Result<String, MathError> {
        let html = self.backend.render(data, display, &self.macros)?;
        self.macros.absorb(data);
        Ok(html)
    }

    /// Render a single expression for callers that already isolated it.
    pub fn render_expression(&mut self, tex: &str, display: bool) -> Result<String, MathError> {
        self.render_span(tex, display)
    }

    /// Clear the macro table. Call once at the start of a pass, never mid-pass.
    pub fn reset_macros(&mut self) {
        self.macros.reset();
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }
}

impl std::fmt::Debug for MathRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MathRenderer")
            .field("macros", &self.macros)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbs_tex_definitions() {
        let mut table = MacroTable::new();
        table.absorb(r"\gdef\RR{\mathbb{R}} x \in \RR");
        assert_eq!(table.get(r"\RR"), Some(r"\mathbb{R}"));

        table.absorb(r"\def\pair#1#2{(#1, #2)}");
        assert_eq!(table.get(r"\pair"), Some("(#1, #2)"));
    }

    #[test]
    fn absorbs_latex_definitions() {
        let mut table = MacroTable::new();
        table.absorb(r"\newcommand{\norm}[1]{\lVert #1 \rVert}");
        table.absorb(r"\renewcommand\half{\frac{1}{2}}");
        assert_eq!(table.get(r"\norm"), Some(r"\lVert #1 \rVert"));
        assert_eq!(table.get(r"\half"), Some(r"\frac{1}{2}"));
    }

    #[test]
    fn provide_command_keeps_existing_definition() {
        let mut table = MacroTable::new();
        table.insert(r"\e", r"\mathrm{e}");
        table.absorb(r"\providecommand{\e}{e} \providecommand{\i}{\mathrm{i}}");
        assert_eq!(table.get(r"\e"), Some(r"\mathrm{e}"));
        assert_eq!(table.get(r"\i"), Some(r"\mathrm{i}"));
    }

    #[test]
    fn ignores_unbalanced_definitions() {
        let mut table = MacroTable::new();
        table.absorb(r"\gdef\broken{\alpha");
        table.absorb(r"\newcommand{notamacro}{x}");
        assert!(table.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut table = MacroTable::new();
        table.absorb(r"\gdef\a{1}\gdef\b{2}");
        assert_eq!(table.len(), 2);
        table.reset();
        assert!(table.is_empty());
    }

    struct EchoBackend;

    impl MathBackend for EchoBackend {
        fn render(
            &self,
            tex: &str,
            display: bool,
            macros: &MacroTable,
        ) -> Result<String, MathError> {
            Ok(format!("[{display}:{tex}:{}]", macros.len()))
        }
    }

    #[test]
    fn definitions_are_visible_to_later_spans() {
        let mut renderer = MathRenderer::new(Arc::new(EchoBackend));
        assert_eq!(
            renderer.render_span(r"\gdef\x{1}", false).unwrap(),
            r"[false:\gdef\x{1}:0]"
        );
        assert_eq!(renderer.render_span(r"\x", true).unwrap(), r"[true:\x:1]");

        renderer.reset_macros();
        assert_eq!(renderer.render_expression(r"\x", false).unwrap(), r"[false:\x:0]");
    }

    #[test]
    fn katex_renders_inline_and_display() {
        let backend = KatexBackend;
        let inline = backend
            .render("a+b", false, &MacroTable::new())
            .expect("inline renders");
        assert!(inline.contains("katex"));
        assert!(!inline.contains("katex-display"));

        let display = backend
            .render("a+b", true, &MacroTable::new())
            .expect("display renders");
        assert!(display.contains("katex-display"));
    }

    #[test]
    fn katex_uses_macro_table() {
        let mut macros = MacroTable::new();
        macros.insert(r"\RR", r"\mathbb{R}");
        let html = KatexBackend
            .render(r"\RR", false, &macros)
            .expect("macro expands");
        assert!(html.contains("mathbb"));
    }

    #[test]
    fn katex_sees_only_the_macros_of_the_current_pass() {
        let mut renderer = MathRenderer::new(Arc::new(KatexBackend));
        renderer
            .render_span(r"\gdef\Foo{q}", false)
            .expect("definition renders");
        let html = renderer.render_span(r"\Foo", false).expect("macro expands");
        assert!(html.contains('q'));

        renderer.reset_macros();
        let err = renderer.render_span(r"\Foo", false).unwrap_err();
        assert!(err.to_string().contains(r"\Foo"));
    }

    #[test]
    fn katex_reports_malformed_expressions() {
        let err = KatexBackend
            .render(r"\frac{1}{", false, &MacroTable::new())
            .unwrap_err();
        assert!(matches!(err, MathError::Render { .. }));
    }
}
