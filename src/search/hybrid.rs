use std::collections::HashMap;

/// RRF constant.
pub const RRF_K: f32 = 60.0;

/// One native ranking (best first) of snapshot positions, with its weight.
pub struct RankedList<'a> {
    pub positions: &'a [usize],
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub position: usize,
    pub score: f32,
}

/// Weighted reciprocal rank fusion.
///
/// `score(f) = Σ weight / (RRF_K + rank)` over the lists containing `f`,
/// with 1-based ranks. Lists with a non-positive weight are skipped while
/// any list has a positive one. When every weight is zero, all candidates
/// are kept with score 0.0 in first-seen order. Ties keep first-seen order
/// across the lists in the order given.
pub fn weighted_rrf_fusion(lists: &[RankedList<'_>], limit: usize) -> Vec<FusedHit> {
    let mut fused: Vec<FusedHit> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();

    let any_weighted = lists.iter().any(|l| l.weight > 0.0);

    for list in lists.iter().filter(|l| l.weight > 0.0 || !any_weighted) {
        let weight = list.weight.max(0.0);
        for (rank, &position) in list.positions.iter().enumerate() {
            let contribution = weight / (RRF_K + rank as f32 + 1.0);

            let idx = *slot.entry(position).or_insert_with(|| {
                fused.push(FusedHit {
                    position,
                    score: 0.0,
                });
                fused.len() - 1
            });
            fused[idx].score += contribution;
        }
    }

    // Stable sort keeps first-seen order among equal scores.
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(limit);
    fused
}
