use std::{borrow::Cow, collections::HashSet};

use ammonia::Builder as AmmoniaBuilder;
use once_cell::sync::Lazy;

static PREVIEW_SANITIZER: Lazy<AmmoniaBuilder<'static>> = Lazy::new(build_preview_sanitizer);

/// Strip anything executable from engine output before it reaches the page.
pub fn sanitize_body(html: &str) -> String {
    PREVIEW_SANITIZER.clean(html).to_string()
}

/// Allow-list covering CommonMark output plus KaTeX's HTML (spans with inline
/// sizing styles and the SVG glyphs used for radicals, arrows and braces).
fn build_preview_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "blockquote",
        "br",
        "code",
        "del",
        "div",
        "em",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "img",
        "li",
        "ol",
        "p",
        "pre",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "ul",
        "svg",
        "path",
        "line",
        "g",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> =
        HashSet::from(["class", "id", "title", "lang", "dir", "aria-hidden", "style"]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("img", &["alt", "width", "height"]);
    builder.add_tag_attributes("th", &["align"]);
    builder.add_tag_attributes("td", &["align"]);
    builder.add_tag_attributes(
        "svg",
        &[
            "xmlns",
            "width",
            "height",
            "viewBox",
            "preserveAspectRatio",
        ],
    );
    builder.add_tag_attributes("path", &["d"]);
    builder.add_tag_attributes("line", &["x1", "y1", "x2", "y2", "stroke-width"]);

    builder.attribute_filter(|_element, attribute, value| {
        if attribute.eq_ignore_ascii_case("style") {
            sanitize_style_attribute(value).map(Cow::Owned)
        } else {
            Some(Cow::Borrowed(value))
        }
    });

    builder
}

fn sanitize_style_attribute(value: &str) -> Option<String> {
    let sanitized: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty() && is_safe_style_declaration(decl))
        .collect();

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized.join("; "))
    }
}

fn is_safe_style_declaration(decl: &str) -> bool {
    const FORBIDDEN_SUBSTRINGS: [&str; 7] = [
        "expression(",
        "javascript:",
        "vbscript:",
        "-moz-binding",
        "behavior:",
        "behaviour:",
        "@import",
    ];

    let lower = decl.to_ascii_lowercase();
    if FORBIDDEN_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return false;
    }

    // KaTeX never emits url(); any reference is dropped.
    !lower.contains("url(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_scripts_and_handlers() {
        let html = sanitize_body(
            r#"<p onclick="steal()">hi<script>alert(1)</script></p><img src="x" onerror="boom()">"#,
        );
        assert!(!html.contains("script"));
        assert!(!html.contains("onclick"));
        assert!(!html.contains("onerror"));
        assert!(html.contains("<p>hi</p>"));
    }

    #[test]
    fn keeps_katex_markup() {
        let katex = r#"<span class="katex"><span class="katex-html" aria-hidden="true"><span class="strut" style="height:0.6444em;"></span><svg xmlns="http://www.w3.org/2000/svg" width="400em" height="1.08em" viewBox="0 0 400000 1080" preserveAspectRatio="xMinYMin slice"><path d="M95,702"></path></svg></span></span>"#;
        let html = sanitize_body(katex);
        assert!(html.contains(r#"class="katex-html""#));
        assert!(html.contains(r#"style="height:0.6444em""#));
        assert!(html.contains(r#"viewBox="0 0 400000 1080""#));
        assert!(html.contains(r#"<path d="M95,702">"#));
    }

    #[test]
    fn style_filter_keeps_only_safe_declarations() {
        assert_eq!(
            sanitize_style_attribute("height:1em; background:url(javascript:x); top:0").as_deref(),
            Some("height:1em; top:0")
        );
        assert_eq!(sanitize_style_attribute("width: expression(alert(1))"), None);
    }
}
