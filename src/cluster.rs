//! Clusterer (§4.D): seeded k-means++ over arbitrary-dimension feature
//! vectors, producing a per-superpixel cluster assignment.
use crate::error::{PipelineError, Stage};

use rand::Rng;
use rayon::prelude::*;

/// Output of one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    /// Per-feature cluster assignment, `[0, K)`.
    pub assignments: Vec<i32>,
    /// Final cluster centers, in the same space as `features` unless
    /// `unweighted` was supplied to [`run`], in which case these are the
    /// unweighted recomputation.
    pub centers: Vec<Vec<f32>>,
    /// Number of Lloyd iterations actually run.
    pub iterations: u32,
    /// `true` iff `totalDelta < convergenceEpsilon` was reached before the
    /// iteration budget was exhausted; a forced stop at
    /// `maxIterations` is reported as `false` even though the loop still
    /// terminated, so callers can tell the two apart.
    pub converged: bool,
}

#[inline]
fn dist_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn kmeans_plus_plus<R: Rng>(features: &[Vec<f32>], k: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let n = features.len();
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.gen_range(0..n));

    let mut d2 = vec![f32::INFINITY; n];
    for i in 0..n {
        d2[i] = dist_sq(&features[i], &features[chosen[0]]);
    }

    while chosen.len() < k {
        let last = *chosen.last().unwrap();
        for i in 0..n {
            let d = dist_sq(&features[i], &features[last]);
            if d < d2[i] {
                d2[i] = d;
            }
        }

        let total: f64 = d2.iter().map(|&d| f64::from(d)).sum();
        let next = if total <= 0.0 {
            // All remaining points coincide with a chosen center; fall back
            // to the first point not yet chosen, scanning in index order.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut selected = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                cumulative += f64::from(d);
                if cumulative >= target {
                    selected = i;
                    break;
                }
            }
            selected
        };
        chosen.push(next);
    }

    chosen.into_iter().map(|i| features[i].clone()).collect()
}

/// Run seeded k-means++ and Lloyd iterations over `features`.
///
/// `unweighted`, if supplied, must be the same length as `features`; final
/// reported centers are then recomputed as the per-cluster mean of
/// `unweighted` rather than `features` (§4.D "Weighted-feature
/// recomputation"). Assignments are always computed against `features`.
pub fn run<R: Rng>(
    features: &[Vec<f32>],
    k: usize,
    max_iterations: u32,
    convergence_epsilon: f32,
    unweighted: Option<&[Vec<f32>]>,
    rng: &mut R,
) -> Result<ClusterOutput, PipelineError> {
    let stage = Stage::Cluster;
    let n = features.len();
    if n == 0 {
        return Err(PipelineError::invalid_input(stage, "empty feature set"));
    }
    let dim = features[0].len();
    if dim == 0 {
        return Err(PipelineError::invalid_input(
            stage,
            "feature vectors have zero dimension",
        ));
    }
    if k < 1 {
        return Err(PipelineError::invalid_input(stage, "K must be >= 1"));
    }
    if k > n {
        return Err(PipelineError::invalid_input(
            stage,
            format!("K ({k}) exceeds the number of points ({n})"),
        ));
    }
    if let Some(u) = unweighted {
        if u.len() != n {
            return Err(PipelineError::invalid_input(
                stage,
                "unweighted feature set length does not match features",
            ));
        }
    }

    log::debug!("cluster: {n} points, K={k}, max_iterations={max_iterations}");

    let mut centers = kmeans_plus_plus(features, k, rng);
    let mut assignments = vec![-1i32; n];
    let mut iterations_run = 0u32;
    let mut converged = false;

    for iteration in 0..max_iterations {
        iterations_run = iteration + 1;

        assignments = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for (c, center) in centers.iter().enumerate() {
                    let d = dist_sq(&features[i], center);
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
                best as i32
            })
            .collect();

        let chunk_size = (n / rayon::current_num_threads().max(1)).max(1);
        let idxs: Vec<usize> = (0..n).collect();
        let partials: Vec<(Vec<Vec<f32>>, Vec<u32>)> = idxs
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut sums = vec![vec![0.0f32; dim]; k];
                let mut counts = vec![0u32; k];
                for &i in chunk {
                    let c = assignments[i] as usize;
                    for (s, v) in sums[c].iter_mut().zip(&features[i]) {
                        *s += v;
                    }
                    counts[c] += 1;
                }
                (sums, counts)
            })
            .collect();

        let mut total_sums = vec![vec![0.0f32; dim]; k];
        let mut total_counts = vec![0u32; k];
        for (sums, counts) in partials {
            for c in 0..k {
                for d in 0..dim {
                    total_sums[c][d] += sums[c][d];
                }
                total_counts[c] += counts[c];
            }
        }

        let mut new_centers = centers.clone();
        for c in 0..k {
            if total_counts[c] == 0 {
                continue; // retain previous center
            }
            let count = total_counts[c] as f32;
            for d in 0..dim {
                new_centers[c][d] = total_sums[c][d] / count;
            }
        }

        let total_delta: f32 = new_centers
            .iter()
            .zip(&centers)
            .map(|(new, old)| dist_sq(new, old).sqrt())
            .sum();

        centers = new_centers;

        if total_delta < convergence_epsilon {
            converged = true;
            break;
        }
    }

    let reported_centers = if let Some(unweighted) = unweighted {
        recompute_unweighted(unweighted, &assignments, k)
    } else {
        centers
    };

    Ok(ClusterOutput {
        assignments,
        centers: reported_centers,
        iterations: iterations_run,
        converged,
    })
}

/// Recompute cluster centers as the per-cluster mean of `unweighted`
/// features, given a fixed `assignments` vector. Used to report true
/// (unweighted) color centers outward after clustering ran on weighted
/// features.
fn recompute_unweighted(unweighted: &[Vec<f32>], assignments: &[i32], k: usize) -> Vec<Vec<f32>> {
    let dim = unweighted.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dim]; k];
    let mut counts = vec![0u32; k];
    for (features, &assignment) in unweighted.iter().zip(assignments) {
        if assignment < 0 {
            continue;
        }
        let c = assignment as usize;
        for (s, v) in sums[c].iter_mut().zip(features) {
            *s += v;
        }
        counts[c] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| {
            if count == 0 {
                sum
            } else {
                sum.into_iter().map(|v| v / count as f32).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    #[test]
    fn rejects_k_greater_than_n() {
        let features = vec![vec![0.0], vec![1.0]];
        let err = run(&features, 3, 10, 0.01, None, &mut rng(1)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_empty_features() {
        let features: Vec<Vec<f32>> = vec![];
        let err = run(&features, 1, 10, 0.01, None, &mut rng(1)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn separates_two_well_separated_clusters() {
        let features = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![100.0, 100.0],
            vec![100.1, 100.0],
            vec![100.0, 100.1],
        ];
        let out = run(&features, 2, 50, 0.001, None, &mut rng(1)).unwrap();
        let first_cluster = out.assignments[0];
        assert!(out.assignments[..3].iter().all(|&a| a == first_cluster));
        let second_cluster = out.assignments[3];
        assert_ne!(first_cluster, second_cluster);
        assert!(out.assignments[3..].iter().all(|&a| a == second_cluster));
    }

    #[test]
    fn deterministic_given_same_seed() {
        let features: Vec<Vec<f32>> = (0..32)
            .map(|i| vec![(i as f32 * 37.0) % 97.0, (i as f32 * 13.0) % 53.0])
            .collect();
        let a = run(&features, 4, 50, 0.01, None, &mut rng(42)).unwrap();
        let b = run(&features, 4, 50, 0.01, None, &mut rng(42)).unwrap();
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.centers, b.centers);
    }

    #[test]
    fn unweighted_recomputation_ignores_weighting() {
        // Clustering features carry an inflated 3rd axis; unweighted colors
        // drop it. Centers reported outward should reflect only the first
        // two axes' means, taken from `unweighted`.
        let features = vec![
            vec![0.0, 0.0, 1000.0],
            vec![1.0, 0.0, 1000.0],
            vec![50.0, 50.0, -1000.0],
            vec![51.0, 50.0, -1000.0],
        ];
        let unweighted = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![50.0, 50.0],
            vec![51.0, 50.0],
        ];
        let out = run(&features, 2, 50, 0.001, Some(&unweighted), &mut rng(7)).unwrap();
        for center in &out.centers {
            assert_eq!(center.len(), 2);
        }
    }
}
