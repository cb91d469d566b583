//! Caption cleanup: LLM lead-in stripping and identifier-token prefixing.

use std::sync::LazyLock;

/// Subjects LLM captioners tend to open with.
const BEGINNING_PHRASES: &[&str] = &[
    "This video",
    "The video",
    "This clip",
    "The clip",
    "The animation",
    "This image",
    "The image",
    "This picture",
    "The picture",
];

const CONTINUATION_WORDS: &[&str] = &[
    "shows",
    "depicts",
    "features",
    "captures",
    "highlights",
    "introduces",
    "presents",
];

const LITERAL_OPENERS: &[&str] = &[
    "In the video,",
    "In this video,",
    "In this video clip,",
    "In the clip,",
    "Caption:",
];

/// Ordered catalog of lead-in phrases; earlier entries win.
pub static LLM_START_PHRASES: LazyLock<Vec<String>> = LazyLock::new(|| {
    let combined = BEGINNING_PHRASES.iter().flat_map(|beginning| {
        CONTINUATION_WORDS
            .iter()
            .map(move |continuation| format!("{beginning} {continuation}"))
    });
    LITERAL_OPENERS
        .iter()
        .map(|s| s.to_string())
        .chain(combined)
        .collect()
});

/// Trim `prompt` and drop the first catalog phrase it starts with.
///
/// Only one phrase is removed. Prompts with no matching phrase come back trimmed.
pub fn strip_llm_prefix(prompt: &str) -> String {
    let prompt = prompt.trim();
    LLM_START_PHRASES
        .iter()
        .find_map(|phrase| prompt.strip_prefix(phrase.as_str()))
        .unwrap_or(prompt)
        .trim()
        .to_string()
}

/// Render an identifier token as the prefix it contributes: `"token "`, or `""`
/// when absent or blank. A whitespace-only token adds nothing, not a lone space.
pub fn format_id_token(id_token: Option<&str>) -> String {
    match id_token.map(str::trim) {
        Some(token) if !token.is_empty() => format!("{token} "),
        _ => String::new(),
    }
}

/// Produce the prompts handed to the encoder from the raw captions.
pub fn normalize_prompts<'a, I>(raw: I, remove_llm_prefixes: bool, id_token: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format_id_token(id_token);
    raw.into_iter()
        .map(|prompt| {
            if remove_llm_prefixes {
                format!("{prefix}{}", strip_llm_prefix(prompt))
            } else {
                format!("{prefix}{prompt}")
            }
        })
        .collect()
}
