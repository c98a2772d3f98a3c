use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    collector::{Count, TopDocs},
    doc,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    collaborators::Ranker,
    collection::CollectionId,
    doc_id::DocumentId,
    error::Result,
};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const COLLECTION: &str = "collection";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const MTIME: &str = "mtime";
}

/// The local lexical ranker: a Tantivy BM25 index partitioned by
/// collection.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub doc_id: Field,
    pub collection: Field,
    pub title: Field,
    pub body: Field,
    pub mtime: Field,
}

/// A search result from the index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub score: f32,
    pub doc_id: String,
    pub collection: String,
    pub title: String,
    pub mtime: u64,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);
    let collection =
        builder.add_text_field(fields::COLLECTION, STRING | STORED | FAST);

    let title_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let title = builder.add_text_field(fields::TITLE, title_opts);

    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("en_stem")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);

    let mtime = builder.add_u64_field(fields::MTIME, STORED | FAST);

    let schema = builder.build();
    let fields = SchemaFields {
        doc_id,
        collection,
        title,
        body,
        mtime,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl SearchIndex {
    /// Open or create a search index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Create an in-memory search index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add a document to the index via the given writer, replacing any
    /// earlier version with the same id in the same collection.
    pub fn add_document(
        &self,
        writer: &IndexWriter,
        doc_id: &str,
        collection: &str,
        title: &str,
        body: &str,
        mtime: u64,
    ) -> Result<()> {
        let f = self.fields;

        let same_doc = BooleanQuery::new(vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    tantivy::Term::from_field_text(f.doc_id, doc_id),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>,
            ),
            (
                Occur::Must,
                Box::new(self.collection_query(collection)) as Box<dyn Query>,
            ),
        ]);
        writer.delete_query(Box::new(same_doc))?;

        writer.add_document(doc!(
            f.doc_id => doc_id,
            f.collection => collection,
            f.title => title,
            f.body => body,
            f.mtime => mtime,
        ))?;

        Ok(())
    }

    /// Delete all documents belonging to a collection.
    pub fn delete_collection(&self, writer: &IndexWriter, collection: &str) {
        let term =
            tantivy::Term::from_field_text(self.fields.collection, collection);
        writer.delete_term(term);
    }

    /// Search within a specific collection with BM25 scoring.
    ///
    /// Returns the top `limit` results. The `title` field is boosted 2x.
    pub fn search_in_collection(
        &self,
        query_str: &str,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let f = self.fields;
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![f.title, f.body]);
        parser.set_field_boost(f.title, 2.0);
        let (user_query, _errors) = parser.parse_query_lenient(query_str);

        let combined = BooleanQuery::new(vec![
            (Occur::Must, user_query),
            (
                Occur::Must,
                Box::new(self.collection_query(collection)) as Box<dyn Query>,
            ),
        ]);

        let top_docs =
            searcher.search(&combined, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(SearchResult {
                score,
                doc_id: extract_text(&doc, f.doc_id),
                collection: extract_text(&doc, f.collection),
                title: extract_text(&doc, f.title),
                mtime: extract_u64(&doc, f.mtime),
            });
        }

        Ok(results)
    }

    /// Number of documents indexed for a collection.
    pub fn count_in_collection(&self, collection: &str) -> Result<u64> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let count =
            searcher.search(&self.collection_query(collection), &Count)?;
        Ok(count as u64)
    }

    fn collection_query(&self, collection: &str) -> TermQuery {
        let term =
            tantivy::Term::from_field_text(self.fields.collection, collection);
        TermQuery::new(term, IndexRecordOption::Basic)
    }
}

impl Ranker for SearchIndex {
    fn rank(
        &self,
        collection: &CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<DocumentId>> {
        Ok(self
            .search_in_collection(query, collection.as_str(), k)?
            .into_iter()
            .map(|r| DocumentId::new(r.doc_id))
            .collect())
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
