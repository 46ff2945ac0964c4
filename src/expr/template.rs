//! Placeholder scanning for `fill_template` - `{{NAME}}` substitution
//!
//! Only placeholders whose name is declared in the substitution map are
//! replaced. Everything else, including undeclared `{{OTHER}}` tokens,
//! is copied through byte for byte.

use std::sync::LazyLock;

use regex::Regex;

/// Pre-compiled regex for {{NAME}} placeholders
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("placeholder pattern is valid")
});

/// A piece of a template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Split `template` into text and declared placeholders
///
/// `is_declared` decides which `{{NAME}}` tokens count as placeholders;
/// the rest stay inside the surrounding text segment.
pub fn segments<'a>(template: &'a str, is_declared: impl Fn(&str) -> bool) -> Vec<Segment<'a>> {
    let mut out = Vec::new();
    let mut last_end = 0;

    for cap in PLACEHOLDER_RE.captures_iter(template) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        if !is_declared(name.as_str()) {
            continue;
        }
        if whole.start() > last_end {
            out.push(Segment::Text(&template[last_end..whole.start()]));
        }
        out.push(Segment::Placeholder(name.as_str()));
        last_end = whole.end();
    }

    if last_end < template.len() {
        out.push(Segment::Text(&template[last_end..]));
    }
    out
}

/// Substitute declared placeholders with already-rendered replacement text
pub fn fill<'r>(template: &str, lookup: impl Fn(&str) -> Option<&'r str>) -> String {
    let mut result = String::with_capacity(template.len() + 32);
    for segment in segments(template, |name| lookup(name).is_some()) {
        match segment {
            Segment::Text(text) => result.push_str(text),
            Segment::Placeholder(name) => {
                if let Some(replacement) = lookup(name) {
                    result.push_str(replacement);
                }
            }
        }
    }
    result
}

/// All placeholder names appearing in `template`, in order of appearance
pub fn placeholder_names(template: &str) -> Vec<&str> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect()
}
