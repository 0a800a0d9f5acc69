use std::collections::HashSet;

use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::BooleanQuery;
use tantivy::schema::*;
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

/// In-memory BM25 index over one fragment snapshot, built on tantivy.
///
/// Documents carry only their position in the snapshot; the fragment text
/// itself lives in the snapshot, so nothing but the position is stored.
pub struct Bm25Index {
    index: Index,
    reader: IndexReader,
    f_position: Field,
    f_content: Field,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Hit {
    /// Position of the fragment in the snapshot it was built from.
    pub position: usize,
    pub score: f32,
}

impl Bm25Index {
    /// Build a RAM-resident index from `(position, text)` pairs.
    pub fn build<'a>(documents: impl IntoIterator<Item = (usize, &'a str)>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_position =
            schema_builder.add_u64_field("position", NumericOptions::default() | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);

        let mut writer: IndexWriter = index
            .writer(50_000_000)
            .context("Failed to create index writer")?;

        let mut len = 0;
        for (position, text) in documents {
            writer.add_document(doc!(
                f_position => position as u64,
                f_content => text.to_string(),
            ))?;
            len += 1;
        }

        writer.commit().context("Failed to commit index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            index,
            reader,
            f_position,
            f_content,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rank fragments by BM25 against the query's terms (any term may match).
    ///
    /// The query is run through the content field's own analyzer instead of
    /// the query parser, so punctuation, quotes or operator-like words in
    /// user input can never produce a parse error.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Bm25Hit>> {
        if limit == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let terms = self.query_terms(query)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let query = BooleanQuery::new_multiterms_query(terms);
        let searcher = self.reader.searcher();

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let Some(position) = doc.get_first(self.f_position).and_then(|v| v.as_u64()) else {
                continue;
            };

            hits.push(Bm25Hit {
                position: position as usize,
                score,
            });
        }

        Ok(hits)
    }

    fn query_terms(&self, query: &str) -> Result<Vec<Term>> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(self.f_content)
            .context("Content field has no tokenizer")?;

        let mut stream = analyzer.token_stream(query);
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        while stream.advance() {
            let text = &stream.token().text;
            if seen.insert(text.clone()) {
                terms.push(Term::from_field_text(self.f_content, text));
            }
        }
        Ok(terms)
    }
}
