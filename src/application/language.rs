//! Display language handed to the markup engine.

/// A selectable display language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageOption {
    pub label: &'static str,
    pub code: &'static str,
}

pub const DEFAULT_LANGUAGE: &str = "en";

pub const SUPPORTED_LANGUAGES: &[LanguageOption] = &[
    LanguageOption {
        label: "English (en)",
        code: "en",
    },
    LanguageOption {
        label: "English (en-US)",
        code: "en-US",
    },
    LanguageOption {
        label: "简体中文 (zh-CN)",
        code: "zh-CN",
    },
    LanguageOption {
        label: "繁體中文 (zh-TW)",
        code: "zh-TW",
    },
    LanguageOption {
        label: "日本語 (ja)",
        code: "ja",
    },
    LanguageOption {
        label: "한국어 (ko)",
        code: "ko",
    },
    LanguageOption {
        label: "Français (fr)",
        code: "fr",
    },
    LanguageOption {
        label: "Deutsch (de)",
        code: "de",
    },
    LanguageOption {
        label: "Español (es)",
        code: "es",
    },
    LanguageOption {
        label: "Español (Latinoamérica) (es-419)",
        code: "es-419",
    },
    LanguageOption {
        label: "Italiano (it)",
        code: "it",
    },
    LanguageOption {
        label: "Português (pt-PT)",
        code: "pt-PT",
    },
    LanguageOption {
        label: "Português (Brasil) (pt-BR)",
        code: "pt-BR",
    },
    LanguageOption {
        label: "Русский (ru)",
        code: "ru",
    },
    LanguageOption {
        label: "Українська (uk)",
        code: "uk",
    },
    LanguageOption {
        label: "Polski (pl)",
        code: "pl",
    },
    LanguageOption {
        label: "Čeština (cs)",
        code: "cs",
    },
    LanguageOption {
        label: "Magyar (hu)",
        code: "hu",
    },
    LanguageOption {
        label: "Română (ro)",
        code: "ro",
    },
    LanguageOption {
        label: "Türkçe (tr)",
        code: "tr",
    },
    LanguageOption {
        label: "Nederlands (nl)",
        code: "nl",
    },
    LanguageOption {
        label: "Svenska (sv)",
        code: "sv",
    },
    LanguageOption {
        label: "Dansk (da)",
        code: "da",
    },
    LanguageOption {
        label: "Norsk Bokmål (nb)",
        code: "nb",
    },
    LanguageOption {
        label: "Suomi (fi)",
        code: "fi",
    },
    LanguageOption {
        label: "Ελληνικά (el)",
        code: "el",
    },
    LanguageOption {
        label: "العربية (ar)",
        code: "ar",
    },
    LanguageOption {
        label: "עברית (he)",
        code: "he",
    },
    LanguageOption {
        label: "हिन्दी (hi)",
        code: "hi",
    },
    LanguageOption {
        label: "ไทย (th)",
        code: "th",
    },
    LanguageOption {
        label: "Tiếng Việt (vi)",
        code: "vi",
    },
    LanguageOption {
        label: "Bahasa Indonesia (id)",
        code: "id",
    },
    LanguageOption {
        label: "Bahasa Melayu (ms)",
        code: "ms",
    },
];

/// Canonicalise a BCP 47-ish tag: `zh_cn` → `zh-CN`, `zh-hant` → `zh-Hant`.
pub fn normalize_language_code(value: &str) -> String {
    let normalized = value.trim().replace('_', "-");
    let mut parts = normalized.split('-').filter(|part| !part.is_empty());

    let Some(language) = parts.next() else {
        return DEFAULT_LANGUAGE.to_string();
    };

    let mut segments = vec![language.to_lowercase()];
    segments.extend(parts.map(|suffix| match suffix.chars().count() {
        2 => suffix.to_uppercase(),
        4 => {
            let mut chars = suffix.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        }
        _ => suffix.to_string(),
    }));
    segments.join("-")
}

fn find_option(code: &str) -> Option<&'static LanguageOption> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|option| option.code.eq_ignore_ascii_case(code))
}

/// Normalise `value` and snap it to the spelling of a supported option.
pub fn resolve_supported_language(value: &str) -> String {
    let normalized = normalize_language_code(value);
    find_option(&normalized)
        .map(|option| option.code.to_string())
        .unwrap_or(normalized)
}

pub fn display_label(value: &str) -> String {
    let resolved = resolve_supported_language(value);
    find_option(&resolved)
        .map(|option| option.label.to_string())
        .unwrap_or_else(|| format!("Unknown Language ({resolved})"))
}
