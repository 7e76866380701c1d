//! Post-processing: deterministic cleanup of VLM output.
//!
//! Models wrap answers in ```` ```markdown ```` fences even when told not to,
//! mix line endings, and sprinkle zero-width characters copied from the
//! rendered page. These passes fix that without touching content. Order
//! matters: fences are stripped before line endings are normalised so the
//! fence regex sees the raw answer, and the final-newline pass runs last.

use crate::config::ResponseFormat;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page of model output according to the requested format.
pub fn normalise(raw: &str, format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Markdown => clean_markdown(raw),
        ResponseFormat::Text => {
            let s = normalise_line_endings(raw);
            let s = remove_invisible_chars(&s);
            ensure_final_newline(s.trim())
        }
    }
}

/// Markdown cleanup passes, in order:
/// 1. strip outer code fences
/// 2. CRLF / CR → LF
/// 3. trim trailing whitespace per line
/// 4. collapse 3+ blank lines to one
/// 5. strip invisible Unicode
/// 6. exactly one final newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Join cleaned pages into one document, a blank line between pages.
pub fn join_pages(pages: &[String]) -> String {
    let joined = pages
        .iter()
        .map(|p| p.trim_end())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    ensure_final_newline(&joined)
}

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").expect("valid regex")
});

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n").into_owned()
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

fn ensure_final_newline(input: &str) -> String {
    let mut s = input.trim_end_matches('\n').to_string();
    s.push('\n');
    s
}
