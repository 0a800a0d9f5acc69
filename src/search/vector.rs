/// Dense index over one fragment snapshot: brute-force cosine similarity
/// against every stored embedding.
pub struct VectorIndex {
    entries: Vec<(usize, Vec<f32>)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    /// Position of the fragment in the snapshot it was built from.
    pub position: usize,
    pub score: f32,
}

impl VectorIndex {
    /// Build from `(position, embedding)` pairs.
    pub fn new(entries: Vec<(usize, Vec<f32>)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search by cosine similarity against a query embedding.
    /// Equal scores keep index order.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<VectorHit> {
        let mut scored: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|(position, embedding)| VectorHit {
                position: *position,
                score: cosine_similarity(query_embedding, embedding),
            })
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        scored
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
