//! Document chunking: structure-aware sentence packing with a recursive
//! fixed-size fallback.
//!
//! ```text
//! text ─► parse_sections ─► split_sentences ─► pack (+overlap) ─► deduplicate
//!              │                   │                                  │
//!              └──── segmentation error ──────┬──── embed error ──────┘
//!                                             ▼
//!                                    RecursiveSplitter
//! ```

pub mod dedup;
pub mod fallback;
pub mod sentences;
pub mod structure;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ChunkingOptions, RagParameters};
use crate::error::ChunkingError;
use crate::llm::Embedder;
use crate::models::{Document, Fragment, FragmentMetadata, SplittingMethod};

use self::fallback::RecursiveSplitter;
use self::structure::DocumentSection;

/// Documents longer than this (in characters) are not segmented structurally.
const MAX_DOCUMENT_CHARS: usize = 1_000_000;

/// A single sentence longer than `chunk_size * MAX_SENTENCE_FACTOR` means
/// segmentation found no usable boundaries.
const MAX_SENTENCE_FACTOR: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub dedup_threshold: f32,
    pub embedding_batch_size: usize,
}

impl ChunkingConfig {
    pub fn new(params: &RagParameters, options: &ChunkingOptions) -> Self {
        Self {
            chunk_size: params.chunk_size,
            chunk_overlap: params.chunk_overlap,
            min_chunk_size: options.min_chunk_size,
            dedup_threshold: options.dedup_threshold,
            embedding_batch_size: options.embedding_batch_size,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::new(&RagParameters::default(), &ChunkingOptions::default())
    }
}

/// Chunk text before it becomes a fragment.
#[derive(Debug, Clone)]
struct SectionChunk {
    text: String,
    section_number: Option<String>,
    section_title: Option<String>,
}

impl AsRef<str> for SectionChunk {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

pub struct DocumentSplitter {
    config: ChunkingConfig,
    /// Deduplication is skipped without an embedder.
    embedder: Option<Arc<dyn Embedder>>,
}

impl DocumentSplitter {
    pub fn new(config: ChunkingConfig, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn split_documents(&self, documents: &[Document]) -> Vec<Fragment> {
        documents
            .iter()
            .flat_map(|doc| self.split_document(doc))
            .collect()
    }

    /// Split one document into ordered fragments.
    ///
    /// Text shorter than `min_chunk_size` yields nothing. Any structured
    /// chunking failure switches the whole document to the recursive splitter.
    pub fn split_document(&self, document: &Document) -> Vec<Fragment> {
        self.split_document_with_embeddings(document)
            .into_iter()
            .map(|(fragment, _)| fragment)
            .collect()
    }

    /// Like [`split_document`](Self::split_document), keeping the embedding
    /// computed during deduplication for each fragment that has one.
    pub fn split_document_with_embeddings(&self, document: &Document) -> Vec<(Fragment, Option<Vec<f32>>)> {
        let source = &document.metadata.source;
        if document.text.trim().chars().count() < self.config.min_chunk_size {
            debug!("Document {source} is shorter than the minimum chunk size");
            return Vec::new();
        }

        match self.structured_chunks(&document.text) {
            Ok(chunks) => {
                debug!("Split {source} into {} structured chunks", chunks.len());
                self.to_fragments(document, chunks, SplittingMethod::StructuredSentences)
            }
            Err(e) => {
                warn!("Structured chunking failed for {source}: {e}. Using recursive fallback");
                let chunks = self
                    .fallback_chunks(&document.text)
                    .into_iter()
                    .map(|text| {
                        let chunk = SectionChunk {
                            text,
                            section_number: None,
                            section_title: None,
                        };
                        (chunk, None)
                    })
                    .collect();
                self.to_fragments(document, chunks, SplittingMethod::RecursiveFallback)
            }
        }
    }

    fn structured_chunks(&self, text: &str) -> Result<Vec<(SectionChunk, Option<Vec<f32>>)>, ChunkingError> {
        let total_chars = text.chars().count();
        if total_chars > MAX_DOCUMENT_CHARS {
            return Err(ChunkingError::Segmentation(format!(
                "document has {total_chars} characters, limit is {MAX_DOCUMENT_CHARS}"
            )));
        }

        let mut chunks = Vec::new();
        for section in structure::parse_sections(text) {
            chunks.extend(self.pack_section(&section)?);
        }

        match &self.embedder {
            Some(embedder) => dedup::deduplicate(
                chunks,
                embedder.as_ref(),
                self.config.dedup_threshold,
                self.config.embedding_batch_size,
            ),
            None => Ok(chunks.into_iter().map(|chunk| (chunk, None)).collect()),
        }
    }

    /// Greedy sentence packing with sentence-level overlap.
    ///
    /// Lengths count one separator character per sentence.
    fn pack_section(&self, section: &DocumentSection) -> Result<Vec<SectionChunk>, ChunkingError> {
        let sentences = sentences::split_sentences(&section.content);
        let max_sentence = self.config.chunk_size * MAX_SENTENCE_FACTOR;
        if let Some(long) = sentences.iter().find(|s| char_len(s) > max_sentence) {
            return Err(ChunkingError::Segmentation(format!(
                "sentence of {} characters exceeds {max_sentence}",
                char_len(long)
            )));
        }

        let prefix = section
            .header()
            .map(|header| format!("{header}\n\n"))
            .unwrap_or_default();
        let prefix_len = char_len(&prefix);

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for sentence in &sentences {
            let sentence_len = char_len(sentence) + 1;

            if !current.is_empty() && prefix_len + current_len + sentence_len > self.config.chunk_size {
                self.emit(&mut chunks, section, &prefix, &current);
                current = self.overlap_tail(&current);
                current_len = current.iter().map(|s| char_len(s) + 1).sum();
            }

            current.push(sentence);
            current_len += sentence_len;
        }

        if !current.is_empty() {
            self.emit(&mut chunks, section, &prefix, &current);
        }

        Ok(chunks)
    }

    /// Longest run of trailing sentences within `chunk_overlap`, or the
    /// last sentence alone when even that does not fit.
    fn overlap_tail<'a>(&self, sentences: &[&'a str]) -> Vec<&'a str> {
        let mut taken = 0usize;
        let mut start = sentences.len();
        for (i, sentence) in sentences.iter().enumerate().rev() {
            let len = char_len(sentence) + 1;
            if taken + len > self.config.chunk_overlap {
                break;
            }
            taken += len;
            start = i;
        }

        if start == sentences.len() {
            sentences.last().copied().into_iter().collect()
        } else {
            sentences[start..].to_vec()
        }
    }

    fn emit(&self, out: &mut Vec<SectionChunk>, section: &DocumentSection, prefix: &str, sentences: &[&str]) {
        let text = format!("{prefix}{}", sentences.join(" "));
        if char_len(&text) < self.config.min_chunk_size {
            return;
        }
        out.push(SectionChunk {
            text,
            section_number: section.number.clone(),
            section_title: section.title.clone(),
        });
    }

    fn fallback_chunks(&self, text: &str) -> Vec<String> {
        RecursiveSplitter::new(self.config.chunk_size, self.config.chunk_overlap)
            .split(text)
            .into_iter()
            .filter(|chunk| char_len(chunk) >= self.config.min_chunk_size)
            .collect()
    }

    fn to_fragments(
        &self,
        document: &Document,
        chunks: Vec<(SectionChunk, Option<Vec<f32>>)>,
        method: SplittingMethod,
    ) -> Vec<(Fragment, Option<Vec<f32>>)> {
        chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (chunk, embedding))| {
                let fragment = Fragment {
                    id: Uuid::new_v4(),
                    metadata: FragmentMetadata {
                        source: document.metadata.source.clone(),
                        chunk_index,
                        chunk_length: char_len(&chunk.text),
                        splitting_method: method,
                        section_number: chunk.section_number,
                        section_title: chunk.section_title,
                        extra: document.metadata.extra.clone(),
                    },
                    text: chunk.text,
                };
                (fragment, embedding)
            })
            .collect()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
