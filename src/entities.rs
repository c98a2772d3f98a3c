//! Marker-based entity extraction for local documents.
//!
//! Recognizes lines such as `Customer: Acme Corp`, `Projekt: Apollo` or
//! `topic: billing` anywhere in a document. The document id is the
//! absolute path of the file.

use std::{collections::BTreeSet, path::Path, sync::LazyLock};

use regex::Regex;

use crate::{
    collaborators::{Entity, EntityExtractor, EntityKind},
    doc_id::DocumentId,
    error::Result,
};

/// Only the head of a document is scanned.
const SCAN_BYTES: usize = 64 * 1024;

const MAX_NAME_CHARS: usize = 64;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)\b(customer|client|kunde|project|projekt|topic|thema)[ \t]*:[ \t]*([^\r\n,;|]+)",
    )
    .expect("valid entity marker regex")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternEntityExtractor;

impl PatternEntityExtractor {
    /// Entities named in `text`.
    pub fn scan(text: &str) -> BTreeSet<Entity> {
        MARKER
            .captures_iter(text)
            .filter_map(|caps| {
                let kind = match caps[1].to_lowercase().as_str() {
                    "customer" | "client" | "kunde" => EntityKind::Customer,
                    "project" | "projekt" => EntityKind::Project,
                    _ => EntityKind::Topic,
                };
                let name = clean_name(&caps[2])?;
                Some(Entity::new(kind, name))
            })
            .collect()
    }
}

impl EntityExtractor for PatternEntityExtractor {
    fn extract(&self, document: &DocumentId) -> Result<BTreeSet<Entity>> {
        let bytes = std::fs::read(Path::new(document.as_str()))?;
        let head = &bytes[..bytes.len().min(SCAN_BYTES)];
        Ok(Self::scan(&String::from_utf8_lossy(head)))
    }
}

fn clean_name(raw: &str) -> Option<String> {
    let name = raw.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '*' | '_' | '`' | '"' | '.')
    });
    if name.is_empty() {
        return None;
    }

    let name: String = name.chars().take(MAX_NAME_CHARS).collect();
    Some(name.trim_end().to_string())
}
