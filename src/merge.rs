//! Merger (§4.E): collapses clusters whose colors lie within a threshold of
//! each other, via one of three strategies.
use crate::config::MergeStrategy;
use crate::error::{PipelineError, Stage};

/// Result of merging a set of clusters.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Original cluster id -> final (dense, renumbered) cluster id.
    pub assignment: Vec<u32>,
    /// Weighted-mean Lab color per final cluster, indexed by final id.
    pub centers: Vec<(f32, f32, f32)>,
    /// Total pixel weight per final cluster, indexed by final id.
    pub weights: Vec<u32>,
}

#[inline]
fn color_dist(a: (f32, f32, f32), b: (f32, f32, f32)) -> f32 {
    let dl = a.0 - b.0;
    let da = a.1 - b.1;
    let db = a.2 - b.2;
    dl * dl + da * da + db * db
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // lower root wins, for a deterministic, input-order-independent
            // final numbering.
            if ra < rb {
                self.parent[rb] = ra;
            } else {
                self.parent[ra] = rb;
            }
        }
    }
}

/// Collapse union-find groups into a dense final assignment plus
/// weighted-mean recombined colors.
fn finalize(
    mut uf: UnionFind,
    centers: &[(f32, f32, f32)],
    weights: &[u32],
) -> MergeOutput {
    let n = centers.len();
    let roots: Vec<usize> = (0..n).map(|i| uf.find(i)).collect();

    let mut root_to_final = std::collections::BTreeMap::new();
    for &root in &roots {
        let next_id = root_to_final.len() as u32;
        root_to_final.entry(root).or_insert(next_id);
    }

    let final_count = root_to_final.len();
    let mut sums = vec![(0.0f32, 0.0f32, 0.0f32); final_count];
    let mut final_weights = vec![0u32; final_count];

    for i in 0..n {
        let final_id = root_to_final[&roots[i]] as usize;
        let w = weights[i] as f32;
        sums[final_id].0 += centers[i].0 * w;
        sums[final_id].1 += centers[i].1 * w;
        sums[final_id].2 += centers[i].2 * w;
        final_weights[final_id] += weights[i];
    }

    let final_centers = sums
        .into_iter()
        .zip(&final_weights)
        .map(|((l, a, b), &w)| {
            if w == 0 {
                (l, a, b)
            } else {
                let w = w as f32;
                (l / w, a / w, b / w)
            }
        })
        .collect();

    let assignment = roots
        .into_iter()
        .map(|root| root_to_final[&root])
        .collect();

    MergeOutput {
        assignment,
        centers: final_centers,
        weights: final_weights,
    }
}

/// Greedily merge the closest pair of clusters whose distance is below
/// `merge_threshold`, recombining by pixel-weighted mean, until no pair
/// remains below it. Ties broken by lexicographically-least `(i, j)`.
fn pairwise_closest(
    centers: &[(f32, f32, f32)],
    weights: &[u32],
    merge_threshold: f32,
) -> MergeOutput {
    let n = centers.len();
    let mut live_centers = centers.to_vec();
    let mut live_weights = weights.to_vec();
    let mut uf = UnionFind::new(n);
    let threshold_sq = merge_threshold * merge_threshold;

    loop {
        let live: Vec<usize> = (0..n).filter(|&i| uf.find_const(i) == i).collect();
        let mut best: Option<(usize, usize, f32)> = None;
        for (ai, &i) in live.iter().enumerate() {
            for &j in &live[ai + 1..] {
                let d = color_dist(live_centers[i], live_centers[j]);
                if d < threshold_sq {
                    match best {
                        Some((_, _, best_d)) if d >= best_d => {}
                        _ => best = Some((i, j, d)),
                    }
                }
            }
        }

        let Some((i, j, _)) = best else { break };
        let wi = live_weights[i] as f32;
        let wj = live_weights[j] as f32;
        let total = wi + wj;
        let merged = if total > 0.0 {
            (
                (live_centers[i].0 * wi + live_centers[j].0 * wj) / total,
                (live_centers[i].1 * wi + live_centers[j].1 * wj) / total,
                (live_centers[i].2 * wi + live_centers[j].2 * wj) / total,
            )
        } else {
            live_centers[i]
        };
        uf.union(i, j);
        let root = uf.find(i);
        live_centers[root] = merged;
        live_weights[root] = weights_sum(live_weights[i], live_weights[j]);
    }

    finalize(uf, centers, weights)
}

fn weights_sum(a: u32, b: u32) -> u32 {
    a.saturating_add(b)
}

/// Const-ish helper so `pairwise_closest`'s live-set filter doesn't need a
/// `&mut self` receiver to check representative-ness during the scan; only
/// valid to call between `union` calls, not interleaved within the `find`
/// path-compression itself.
impl UnionFind {
    fn find_const(&self, x: usize) -> usize {
        let mut cur = x;
        while self.parent[cur] != cur {
            cur = self.parent[cur];
        }
        cur
    }
}

/// Union clusters that are both spatially adjacent (share a 4-connected
/// pixel border in `labels`) and within `merge_threshold` of each other in
/// color, then collapse via weighted mean.
fn region_adjacency(
    centers: &[(f32, f32, f32)],
    weights: &[u32],
    labels: &[u32],
    width: u32,
    height: u32,
    merge_threshold: f32,
) -> MergeOutput {
    let n = centers.len();
    let mut uf = UnionFind::new(n);
    let threshold_sq = merge_threshold * merge_threshold;
    let width = width as usize;
    let height = height as usize;

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let here = labels[idx] as usize;
            if here >= n {
                continue;
            }
            if x + 1 < width {
                let right = labels[idx + 1] as usize;
                if right < n && right != here && color_dist(centers[here], centers[right]) < threshold_sq {
                    uf.union(here, right);
                }
            }
            if y + 1 < height {
                let below = labels[idx + width] as usize;
                if below < n && below != here && color_dist(centers[here], centers[below]) < threshold_sq {
                    uf.union(here, below);
                }
            }
        }
    }

    finalize(uf, centers, weights)
}

/// Run the configured merge strategy.
///
/// `labels` (pixel -> cluster id, required for [`MergeStrategy::RegionAdjacency`])
/// must be `Some` with `width * height` entries when that strategy is
/// selected.
pub fn run(
    strategy: MergeStrategy,
    centers: &[(f32, f32, f32)],
    weights: &[u32],
    merge_threshold: f32,
    labels: Option<&[u32]>,
    width: u32,
    height: u32,
) -> Result<MergeOutput, PipelineError> {
    let stage = Stage::Merge;
    if centers.is_empty() {
        return Err(PipelineError::invalid_input(stage, "no clusters to merge"));
    }
    if centers.len() != weights.len() {
        return Err(PipelineError::invalid_input(
            stage,
            "centers and weights length mismatch",
        ));
    }
    if merge_threshold < 0.0 {
        return Err(PipelineError::invalid_input(
            stage,
            "merge threshold must be non-negative",
        ));
    }

    log::debug!("merge: {} clusters, strategy={strategy:?}", centers.len());

    match strategy {
        MergeStrategy::PairwiseClosest => Ok(pairwise_closest(centers, weights, merge_threshold)),
        // Treated as an alias of pairwiseClosest: the iterative-weighted
        // variant is not separately specified beyond sharing the same
        // greedy-merge contract.
        MergeStrategy::IterativeWeighted => Ok(pairwise_closest(centers, weights, merge_threshold)),
        MergeStrategy::RegionAdjacency => {
            let Some(labels) = labels else {
                return Err(PipelineError::invalid_input(
                    stage,
                    "regionAdjacency merge requires a pixel label map",
                ));
            };
            if labels.len() != (width as usize) * (height as usize) {
                return Err(PipelineError::invalid_input(
                    stage,
                    "label map length does not match width * height",
                ));
            }
            Ok(region_adjacency(centers, weights, labels, width, height, merge_threshold))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_centers() {
        let err = run(MergeStrategy::PairwiseClosest, &[], &[], 1.0, None, 0, 0).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn pairwise_closest_merges_near_colors() {
        let centers = [(0.0, 0.0, 0.0), (0.1, 0.0, 0.0), (100.0, 0.0, 0.0)];
        let weights = [10u32, 10, 10];
        let out = run(
            MergeStrategy::PairwiseClosest,
            &centers,
            &weights,
            1.0,
            None,
            0,
            0,
        )
        .unwrap();
        assert_eq!(out.assignment[0], out.assignment[1]);
        assert_ne!(out.assignment[0], out.assignment[2]);
        assert_eq!(out.centers.len(), 2);
        assert_eq!(out.weights.iter().sum::<u32>(), 30);
    }

    #[test]
    fn pairwise_closest_leaves_distant_clusters_unmerged() {
        let centers = [(0.0, 0.0, 0.0), (50.0, 0.0, 0.0), (100.0, 0.0, 0.0)];
        let weights = [1u32, 1, 1];
        let out = run(
            MergeStrategy::PairwiseClosest,
            &centers,
            &weights,
            1.0,
            None,
            0,
            0,
        )
        .unwrap();
        assert_eq!(out.centers.len(), 3);
    }

    #[test]
    fn region_adjacency_requires_labels() {
        let centers = [(0.0, 0.0, 0.0), (0.0, 0.0, 0.0)];
        let weights = [1u32, 1];
        let err = run(
            MergeStrategy::RegionAdjacency,
            &centers,
            &weights,
            1.0,
            None,
            2,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn region_adjacency_only_merges_touching_clusters() {
        // Two clusters of identical color but never adjacent in the label
        // map should not merge; cluster 0 is only adjacent to cluster 1.
        let centers = [(0.0, 0.0, 0.0), (0.0, 0.0, 0.0), (0.0, 0.0, 0.0)];
        let weights = [1u32, 1, 1];
        // 1x3 row: 0 1 2 -- 0 and 1 are adjacent, 1 and 2 are adjacent.
        let labels = [0u32, 1, 2];
        let out = run(
            MergeStrategy::RegionAdjacency,
            &centers,
            &weights,
            1.0,
            Some(&labels),
            3,
            1,
        )
        .unwrap();
        assert_eq!(out.centers.len(), 1);
    }
}
