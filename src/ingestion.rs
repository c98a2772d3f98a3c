use std::{path::Path, sync::Arc};

use rayon::prelude::*;
use tantivy::IndexWriter;
use tracing::{debug, info};

use crate::{
    collaborators::{IndexReport, IndexRequest, Indexer},
    doc_id::DocumentId,
    error::{Error, Result},
    tantivy_index::SearchIndex,
    walker::{self, DiscoveredFile, Filter},
};

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the filename without extension.
pub fn extract_title(content: &str, file_path: &Path) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// Add discovered files to the lexical index under `collection`.
///
/// Files are read in parallel and then written sequentially. Unreadable
/// files (binary, permission denied) are skipped. Commits once at the end
/// and returns the number of documents written.
pub fn ingest_files(
    index: &SearchIndex,
    writer: &mut IndexWriter,
    collection: &str,
    files: &[DiscoveredFile],
) -> Result<usize> {
    let loaded: Vec<_> = files
        .par_iter()
        .filter_map(|file| {
            let content = std::fs::read_to_string(&file.absolute_path).ok()?;
            let title = extract_title(&content, &file.relative_path);
            let doc_id = DocumentId::from_path(&file.absolute_path);
            Some((doc_id, title, content, file.mtime))
        })
        .collect();

    for (doc_id, title, content, mtime) in &loaded {
        index.add_document(
            writer,
            doc_id.as_str(),
            collection,
            title,
            content,
            *mtime,
        )?;
    }

    writer.commit()?;
    Ok(loaded.len())
}

/// Indexes local text documents into the tantivy index.
pub struct LocalIndexer {
    search_index: Arc<SearchIndex>,
}

impl LocalIndexer {
    pub fn new(search_index: Arc<SearchIndex>) -> Self {
        Self { search_index }
    }
}

impl Indexer for LocalIndexer {
    fn index(&self, request: &IndexRequest) -> Result<IndexReport> {
        let Some(path) = &request.path else {
            return Ok(IndexReport::NeedsClarification {
                question: format!(
                    "Which file or folder should I add to '{}'?",
                    request.collection
                ),
            });
        };

        if !path.exists() {
            return Err(Error::NotFound {
                kind: "path",
                name: path.display().to_string(),
            });
        }

        let files = walker::discover_files(
            path,
            request.recursive,
            Filter::TextDocuments,
        )?;
        debug!(
            path = %path.display(),
            recursive = request.recursive,
            files = files.len(),
            "discovered documents"
        );

        let mut writer = self.search_index.writer(WRITER_MEMORY_BUDGET)?;
        let documents = ingest_files(
            &self.search_index,
            &mut writer,
            request.collection.as_str(),
            &files,
        )?;

        info!(
            collection = %request.collection,
            documents,
            "indexed documents"
        );

        Ok(IndexReport::Indexed {
            collection: request.collection.to_string(),
            path: path.clone(),
            documents,
        })
    }
}

impl std::fmt::Debug for LocalIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndexer").finish_non_exhaustive()
    }
}
