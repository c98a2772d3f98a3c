//! Finding the filesystem path a user refers to in free text.
//!
//! The extractor never rejects anything: it reports what it found,
//! including whether the path climbs above its own root. Refusal is the
//! router's decision.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// Tokens that end the part of an utterance a path may be taken from.
const CONJUNCTIONS: &[&str] = &["and", "then", "und", "dann", "&&", ";"];

/// Whole-segment replacements for commonly mistyped folder names.
const SEGMENT_CORRECTIONS: &[(&str, &str)] = &[
    ("destop", "Desktop"),
    ("dekstop", "Desktop"),
    ("desktp", "Desktop"),
    ("deskop", "Desktop"),
    ("dokumente", "Documents"),
    ("documnets", "Documents"),
    ("docments", "Documents"),
    ("downlaods", "Downloads"),
    ("donwloads", "Downloads"),
];

/// A path-shaped span found in an utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedPath {
    /// The token as it appeared, minus surrounding quotes and punctuation.
    pub raw_text_span: String,
    /// Byte offset of `raw_text_span` in the input text.
    pub offset: usize,
    /// Separators collapsed, typos corrected, `..` segments kept.
    pub normalized_path: String,
    pub is_absolute: bool,
    pub is_home_relative: bool,
    /// A `..` segment steps above the path's own root.
    pub looks_like_traversal: bool,
}

/// Where a path is anchored. Declaration order is preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Anchor {
    Absolute,
    Home,
    Relative,
}

#[derive(Debug)]
struct Token<'a> {
    offset: usize,
    text: &'a str,
    quoted: bool,
}

/// Extract the first plausible path from `text`.
///
/// Only the text before the first conjunction is considered. Absolute
/// paths win over home-relative ones, which win over `./`/`../` paths;
/// within a class the leftmost token wins.
pub fn extract(text: &str) -> Option<ExtractedPath> {
    let scope = command_scope(text);

    tokenize(scope)
        .into_iter()
        .filter_map(|token| {
            let (cleaned, shift) = if token.quoted {
                (token.text.trim(), 0)
            } else {
                clean(token.text)
            };
            let anchor = anchor_of(cleaned)?;
            Some((anchor, token.offset + shift, cleaned))
        })
        .min_by_key(|(anchor, offset, _)| (*anchor, *offset))
        .map(|(anchor, offset, span)| build(span, offset, anchor))
}

/// The prefix of `text` before the first conjunction token.
///
/// Conjunctions inside a double-quoted span do not count.
pub fn command_scope(text: &str) -> &str {
    tokenize(text)
        .iter()
        .find(|token| {
            !token.quoted
                && [token.text, clean(token.text).0].iter().any(|word| {
                    CONJUNCTIONS.iter().any(|c| word.eq_ignore_ascii_case(c))
                })
        })
        .map_or(text, |token| &text[..token.offset])
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = text;
    let mut base = 0;

    loop {
        let trimmed = rest.trim_start();
        base += rest.len() - trimmed.len();
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        if let Some(inner) = rest.strip_prefix('"')
            && let Some(end) = inner.find('"')
        {
            tokens.push(Token {
                offset: base + 1,
                text: &inner[..end],
                quoted: true,
            });
            let consumed = end + 2;
            base += consumed;
            rest = &rest[consumed..];
            continue;
        }

        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        tokens.push(Token {
            offset: base,
            text: &rest[..end],
            quoted: false,
        });
        base += end;
        rest = &rest[end..];
    }

    tokens
}

/// Strip wrapping quotes and trailing sentence punctuation from a token.
///
/// Returns the cleaned slice and how many bytes were cut from its front.
fn clean(token: &str) -> (&str, usize) {
    let start = token.trim_start_matches(['\'', '`', '(', '"']);
    let shift = token.len() - start.len();
    let mut end = start
        .trim_end_matches([',', ';', ':', '!', '?', ')', '\'', '`', '"']);
    if end.ends_with('.') && !end.ends_with("..") {
        end = &end[..end.len() - 1];
    }
    (end, shift)
}

fn anchor_of(token: &str) -> Option<Anchor> {
    if token.contains("://") {
        return None;
    }

    if let Some(rest) = token.strip_prefix('/') {
        return rest.chars().any(|c| c != '/').then_some(Anchor::Absolute);
    }
    if is_drive_path(token) {
        return Some(Anchor::Absolute);
    }
    if token.starts_with("~/") {
        return Some(Anchor::Home);
    }
    if token == "."
        || token == ".."
        || token.starts_with("./")
        || token.starts_with("../")
    {
        return Some(Anchor::Relative);
    }

    None
}

fn is_drive_path(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() > 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

fn build(span: &str, offset: usize, anchor: Anchor) -> ExtractedPath {
    let (root, rest, separator) = match anchor {
        Anchor::Absolute if is_drive_path(span) => {
            let separator = if span.contains('\\') { "\\" } else { "/" };
            (format!("{}{separator}", &span[..2]), &span[3..], separator)
        }
        Anchor::Absolute => ("/".to_string(), &span[1..], "/"),
        Anchor::Home => ("~/".to_string(), &span[2..], "/"),
        Anchor::Relative => (String::new(), span, "/"),
    };

    let segments: Vec<&str> = rest
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .map(correct_segment)
        .collect();

    let normalized_path = if segments.is_empty() {
        root.trim_end_matches(['/', '\\']).to_string()
    } else {
        format!("{root}{}", segments.join(separator))
    };

    ExtractedPath {
        raw_text_span: span.to_string(),
        offset,
        normalized_path,
        is_absolute: anchor == Anchor::Absolute,
        is_home_relative: anchor == Anchor::Home,
        looks_like_traversal: escapes_root(&segments),
    }
}

fn correct_segment(segment: &str) -> &str {
    SEGMENT_CORRECTIONS
        .iter()
        .find(|(typo, _)| segment.eq_ignore_ascii_case(typo))
        .map_or(segment, |(_, fixed)| *fixed)
}

fn escapes_root(segments: &[&str]) -> bool {
    let mut depth = 0usize;
    let mut escaped = false;

    for segment in segments {
        match *segment {
            "." => {}
            ".." if depth == 0 => escaped = true,
            ".." => depth -= 1,
            _ => depth += 1,
        }
    }

    escaped
}

impl ExtractedPath {
    pub fn is_relative(&self) -> bool {
        !self.is_absolute && !self.is_home_relative
    }

    /// Turn the normalized path into a concrete one.
    ///
    /// `~` expands to `home`, relative paths are joined onto `working_dir`,
    /// and `.`/`..` components are folded lexically. Callers check
    /// `looks_like_traversal` first.
    pub fn resolve(&self, home: &Path, working_dir: &Path) -> PathBuf {
        let joined = if self.is_home_relative {
            let rest = self
                .normalized_path
                .strip_prefix("~")
                .unwrap_or(&self.normalized_path)
                .trim_start_matches('/');
            home.join(rest)
        } else if self.is_absolute {
            PathBuf::from(&self.normalized_path)
        } else {
            working_dir.join(&self.normalized_path)
        };

        fold_components(&joined)
    }
}

fn fold_components(path: &Path) -> PathBuf {
    let mut folded = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other),
        }
    }
    folded
}
