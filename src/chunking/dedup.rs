//! Near-duplicate suppression between consecutive chunks of one document.

use crate::error::ChunkingError;
use crate::llm::Embedder;
use crate::search::vector::cosine_similarity;

/// Drop every chunk whose embedding is at least `threshold` similar to the
/// previous kept chunk. Kept chunks come back with their embedding.
///
/// Fewer than two chunks are returned unchanged and unembedded.
pub fn deduplicate<T: AsRef<str>>(
    chunks: Vec<T>,
    embedder: &dyn Embedder,
    threshold: f32,
    batch_size: usize,
) -> Result<Vec<(T, Option<Vec<f32>>)>, ChunkingError> {
    if chunks.len() < 2 {
        return Ok(chunks.into_iter().map(|chunk| (chunk, None)).collect());
    }

    let embeddings = embed_in_batches(&chunks, embedder, batch_size)?;

    let mut kept: Vec<(T, Option<Vec<f32>>)> = Vec::with_capacity(chunks.len());
    let mut dropped = 0usize;

    for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
        let baseline = kept.last().and_then(|(_, prev)| prev.as_deref());
        if baseline.is_some_and(|prev| cosine_similarity(prev, &embedding) >= threshold) {
            dropped += 1;
            continue;
        }
        kept.push((chunk, Some(embedding)));
    }

    if dropped > 0 {
        tracing::debug!("Dropped {dropped} near-duplicate chunks");
    }
    Ok(kept)
}

fn embed_in_batches<T: AsRef<str>>(
    chunks: &[T],
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, ChunkingError> {
    let mut embeddings = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let batch: Vec<String> = batch.iter().map(|c| c.as_ref().to_string()).collect();
        let vectors = embedder
            .embed(&batch)
            .map_err(|e| ChunkingError::Deduplication(format!("{e:#}")))?;
        if vectors.len() != batch.len() {
            return Err(ChunkingError::Deduplication(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}
