//! Pipeline Driver (§4.G): chains the stages through a compile-time
//! typestate, so calling a stage out of order is a type error rather than a
//! runtime one.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::aggregate::{self, SuperpixelRecord};
use crate::cluster;
use crate::color::{self, LabPixel, SENTINEL_LABEL};
use crate::config::{MergeStrategy, PipelineConfig};
use crate::error::{PipelineError, Stage};
use crate::extract::{self, Layer};
use crate::merge;
use crate::slic;

/// Cooperative cancellation flag, checked only at stage boundaries — never
/// mid-stage, so a running stage always completes with internally
/// consistent state.
#[derive(Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-yet-canceled token.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// A token that is never canceled; for callers that don't need the
    /// feature.
    pub fn never() -> Self {
        Self::new()
    }

    /// Request cancellation. Observed the next time a stage boundary checks
    /// this token, not before.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CancelToken {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

fn check_cancel(token: &CancelToken, stage: Stage) -> Result<(), PipelineError> {
    if token.is_canceled() {
        Err(PipelineError::Canceled { stage })
    } else {
        Ok(())
    }
}

/// Run metadata surfaced alongside the final layers.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Source image width.
    pub width: u32,
    /// Source image height.
    pub height: u32,
    /// Number of SLIC superpixels with at least one member pixel.
    pub num_superpixels: usize,
    /// `K` as configured, before any merging.
    pub initial_k: usize,
    /// Number of layers actually extracted, after merging (if any).
    pub final_k: usize,
    /// Number of member pixels per final cluster, indexed by final cluster
    /// id (matches `layers` order).
    pub cluster_pixel_counts: Vec<u32>,
    /// Mean color per final cluster in unweighted Lab, indexed by final
    /// cluster id (matches `layers` order).
    pub cluster_mean_colors: Vec<(f32, f32, f32)>,
    /// The `randomSeed` actually used to drive k-means++.
    pub random_seed: u64,
    /// Fixed SLIC iteration count run (§4.B has no convergence check; this
    /// always equals the configured `slicIterations`).
    pub slic_iterations: u32,
    /// Lloyd iterations the clusterer ran.
    pub cluster_iterations: u32,
    /// Whether the clusterer converged before exhausting its iteration
    /// budget.
    pub cluster_converged: bool,
}

/// Final output of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// One layer per final cluster.
    pub layers: Vec<Layer>,
    /// Run metadata.
    pub metadata: Metadata,
}

/// Initial state: a raw BGRA8 source image, nothing derived yet.
#[derive(Clone)]
pub struct Rgba;

/// State after color conversion.
#[derive(Clone)]
pub struct LabSpace {
    lab: Arc<Vec<LabPixel>>,
    mask: Arc<Vec<bool>>,
}

/// State after SLIC segmentation and superpixel aggregation.
#[derive(Clone)]
pub struct SuperpixelSpace {
    lab: Arc<Vec<LabPixel>>,
    labels: Arc<Vec<u32>>,
    num_centers: usize,
    /// Number of SLIC centers with at least one member pixel, i.e.
    /// `records.len()`.
    num_superpixels: usize,
    records: Arc<Vec<SuperpixelRecord>>,
}

/// State after clustering (and, optionally, one or more merges).
#[derive(Clone)]
pub struct ClusterSpace {
    labels: Arc<Vec<u32>>,
    num_centers: usize,
    /// Per-SLIC-label final cluster id, or `-1` for labels with no member
    /// pixels.
    assignment: Arc<Vec<i32>>,
    centers: Arc<Vec<(f32, f32, f32)>>,
    weights: Arc<Vec<u32>>,
    num_superpixels: usize,
    initial_k: usize,
    iterations: u32,
    converged: bool,
}

/// State after layer extraction — terminal.
#[derive(Clone)]
pub struct LayerSpace {
    layers: Vec<Layer>,
    metadata: Metadata,
}

/// A segmentation run, threaded through compile-time-checked stages.
///
/// Every field besides small scalars is `Arc`-wrapped, so [`Pipeline::branch`]
/// is a pointer clone, not a data copy — useful for trying several merge
/// thresholds from the same clustered state without rerunning SLIC or
/// k-means.
#[derive(Clone)]
pub struct Pipeline<S> {
    width: u32,
    height: u32,
    config: PipelineConfig,
    source: Arc<Vec<u8>>,
    depth: Option<Arc<Vec<f32>>>,
    state: S,
}

impl<S: Clone> Pipeline<S> {
    /// Cheaply clone this pipeline so independent continuations (e.g. two
    /// different merge thresholds) can run from the same point.
    pub fn branch(&self) -> Self {
        self.clone()
    }
}

impl Pipeline<Rgba> {
    /// Start a new run over a BGRA8 `bgra` buffer of `width * height`
    /// pixels, with an optional per-pixel `depth` buffer for SLIC's depth
    /// term.
    pub fn new(
        bgra: Vec<u8>,
        width: u32,
        height: u32,
        config: PipelineConfig,
        depth: Option<Vec<f32>>,
    ) -> Result<Self, PipelineError> {
        if let Some(d) = &depth {
            let expected = (width as usize) * (height as usize);
            if d.len() != expected {
                return Err(PipelineError::invalid_input(
                    Stage::Driver,
                    "depth buffer length does not match width * height",
                ));
            }
        }
        Ok(Self {
            width,
            height,
            config,
            source: Arc::new(bgra),
            depth: depth.map(Arc::new),
            state: Rgba,
        })
    }

    /// Run the color converter (§4.A).
    pub fn convert_color(self, token: &CancelToken) -> Result<Pipeline<LabSpace>, PipelineError> {
        check_cancel(token, Stage::ColorConvert)?;
        let (lab, mask) = color::convert(&self.source, self.width, self.height, self.config.lab_scale)?;
        Ok(Pipeline {
            width: self.width,
            height: self.height,
            config: self.config,
            source: self.source,
            depth: self.depth,
            state: LabSpace {
                lab: Arc::new(lab),
                mask: Arc::new(mask),
            },
        })
    }
}

impl Pipeline<LabSpace> {
    /// Run SLIC segmentation (§4.B) followed by superpixel aggregation
    /// (§4.C).
    pub fn segment(self, token: &CancelToken) -> Result<Pipeline<SuperpixelSpace>, PipelineError> {
        check_cancel(token, Stage::Slic)?;
        let depth = self.depth.as_deref().map(Vec::as_slice);
        let slic_out = slic::run(
            &self.state.lab,
            &self.state.mask,
            self.width,
            self.height,
            depth,
            &self.config,
        )?;

        check_cancel(token, Stage::Aggregate)?;
        let (records, _excluded) = aggregate::aggregate(
            &self.state.lab,
            &slic_out.labels,
            slic_out.num_centers,
            self.width,
            self.height,
        )?;

        Ok(Pipeline {
            width: self.width,
            height: self.height,
            config: self.config,
            source: self.source,
            depth: self.depth,
            state: SuperpixelSpace {
                lab: self.state.lab,
                labels: Arc::new(slic_out.labels),
                num_centers: slic_out.num_centers,
                num_superpixels: records.len(),
                records: Arc::new(records),
            },
        })
    }
}

impl Pipeline<SuperpixelSpace> {
    /// Run the clusterer (§4.D) over the per-superpixel mean Lab colors.
    pub fn cluster(self, token: &CancelToken) -> Result<Pipeline<ClusterSpace>, PipelineError> {
        check_cancel(token, Stage::Cluster)?;

        let stage = Stage::Cluster;
        if !(2..=16).contains(&self.config.number_of_clusters) {
            return Err(PipelineError::invalid_input(
                stage,
                format!(
                    "numberOfClusters {} not in [2, 16]",
                    self.config.number_of_clusters
                ),
            ));
        }
        if !(10..=500).contains(&self.config.cluster_max_iterations) {
            return Err(PipelineError::invalid_input(
                stage,
                format!(
                    "clusterMaxIterations {} not in [10, 500]",
                    self.config.cluster_max_iterations
                ),
            ));
        }
        if self.config.convergence_epsilon <= 0.0 || self.config.convergence_epsilon > 1.0 {
            return Err(PipelineError::invalid_input(
                stage,
                format!(
                    "convergenceEpsilon {} not in (0, 1]",
                    self.config.convergence_epsilon
                ),
            ));
        }

        let features: Vec<Vec<f32>> = self
            .state
            .records
            .iter()
            .map(|r| vec![r.lab_color.0, r.lab_color.1, r.lab_color.2])
            .collect();

        // `features` are in scaled Lab space (§4.A step 5 applies
        // `lab_scale` at conversion time, and aggregation means are linear,
        // so the scaling carries through unchanged). Recover the unweighted
        // original color by dividing back out per-axis, and feed it to the
        // clusterer so the centers reported outward are the unweighted
        // means §4.D and §6 require, not the scaled clustering space.
        let scale = self.config.lab_scale;
        let unweighted: Vec<Vec<f32>> = features
            .iter()
            .map(|f| vec![f[0] / scale.l, f[1] / scale.a, f[2] / scale.b])
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let out = cluster::run(
            &features,
            self.config.number_of_clusters,
            self.config.cluster_max_iterations,
            self.config.convergence_epsilon,
            Some(&unweighted),
            &mut rng,
        )?;

        let mut label_assignment = vec![-1i32; self.state.num_centers];
        let mut weights = vec![0u32; self.config.number_of_clusters];
        for (idx, record) in self.state.records.iter().enumerate() {
            let c = out.assignments[idx];
            label_assignment[record.id as usize] = c;
            if c >= 0 {
                weights[c as usize] += record.pixel_count;
            }
        }
        let centers = out.centers.iter().map(|c| (c[0], c[1], c[2])).collect();

        Ok(Pipeline {
            width: self.width,
            height: self.height,
            config: self.config,
            source: self.source,
            depth: self.depth,
            state: ClusterSpace {
                labels: self.state.labels,
                num_centers: self.state.num_centers,
                assignment: Arc::new(label_assignment),
                centers: Arc::new(centers),
                weights: Arc::new(weights),
                num_superpixels: self.state.num_superpixels,
                initial_k: out.centers.len(),
                iterations: out.iterations,
                converged: out.converged,
            },
        })
    }
}

impl Pipeline<ClusterSpace> {
    fn pixel_clusters(&self) -> Vec<u32> {
        self.state
            .labels
            .iter()
            .map(|&label| {
                if label == SENTINEL_LABEL {
                    u32::MAX
                } else {
                    // `-1` (no member pixels) wraps to `u32::MAX`, which
                    // never matches a real cluster id.
                    self.state.assignment[label as usize] as u32
                }
            })
            .collect()
    }

    /// Run the merger (§4.E), if [`PipelineConfig::merge_threshold`] is
    /// configured. A no-op (returns `self` unchanged) otherwise.
    pub fn merge(self, token: &CancelToken) -> Result<Self, PipelineError> {
        check_cancel(token, Stage::Merge)?;

        let Some(threshold) = self.config.merge_threshold else {
            return Ok(self);
        };

        let pixel_clusters = if self.config.merge_strategy == MergeStrategy::RegionAdjacency {
            Some(self.pixel_clusters())
        } else {
            None
        };

        let out = merge::run(
            self.config.merge_strategy,
            &self.state.centers,
            &self.state.weights,
            threshold,
            pixel_clusters.as_deref(),
            self.width,
            self.height,
        )?;

        let new_assignment: Vec<i32> = self
            .state
            .assignment
            .iter()
            .map(|&c| if c < 0 { -1 } else { out.assignment[c as usize] as i32 })
            .collect();

        Ok(Pipeline {
            width: self.width,
            height: self.height,
            config: self.config,
            source: self.source,
            depth: self.depth,
            state: ClusterSpace {
                labels: self.state.labels,
                num_centers: self.state.num_centers,
                assignment: Arc::new(new_assignment),
                centers: Arc::new(out.centers),
                weights: Arc::new(out.weights),
                num_superpixels: self.state.num_superpixels,
                initial_k: self.state.initial_k,
                iterations: self.state.iterations,
                converged: self.state.converged,
            },
        })
    }

    /// Run the layer extractor (§4.F), producing one layer per final
    /// cluster.
    pub fn extract_layers(self, token: &CancelToken) -> Result<Pipeline<LayerSpace>, PipelineError> {
        check_cancel(token, Stage::Extract)?;

        let num_final = self.state.centers.len();
        let pixel_clusters = self.pixel_clusters();
        let layers = extract::extract(&self.source, self.width, self.height, &pixel_clusters, num_final)?;

        let metadata = Metadata {
            width: self.width,
            height: self.height,
            num_superpixels: self.state.num_superpixels,
            initial_k: self.state.initial_k,
            final_k: num_final,
            cluster_pixel_counts: self.state.weights.as_ref().clone(),
            cluster_mean_colors: self.state.centers.as_ref().clone(),
            random_seed: self.config.random_seed,
            slic_iterations: self.config.slic_iterations,
            cluster_iterations: self.state.iterations,
            cluster_converged: self.state.converged,
        };

        Ok(Pipeline {
            width: self.width,
            height: self.height,
            config: self.config,
            source: self.source,
            depth: self.depth,
            state: LayerSpace { layers, metadata },
        })
    }
}

impl Pipeline<LayerSpace> {
    /// Consume the pipeline and return its final result.
    pub fn into_result(self) -> PipelineResult {
        PipelineResult {
            layers: self.state.layers,
            metadata: self.state.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn checkerboard(cell: usize, cells: usize) -> (Vec<u8>, u32, u32) {
        let side = (cell * cells) as u32;
        let red = [0u8, 0, 255, 255];
        let blue = [255u8, 0, 0, 255];
        let mut bgra = Vec::with_capacity((side * side * 4) as usize);
        for y in 0..side {
            for x in 0..side {
                let cx = (x as usize) / cell;
                let cy = (y as usize) / cell;
                let is_red = (cx + cy) % 2 == 0;
                bgra.extend_from_slice(if is_red { &red } else { &blue });
            }
        }
        (bgra, side, side)
    }

    #[test]
    fn full_run_produces_one_layer_per_cluster() {
        let (bgra, w, h) = checkerboard(5, 10);
        let config = PipelineConfig {
            n_segments: 50,
            number_of_clusters: 2,
            random_seed: 1,
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(bgra, w, h, config, None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap()
            .cluster(&CancelToken::never())
            .unwrap()
            .extract_layers(&CancelToken::never())
            .unwrap()
            .into_result();

        assert_eq!(result.layers.len(), result.metadata.final_k);
        assert_eq!(result.metadata.final_k, 2);
        for layer in &result.layers {
            assert_eq!(layer.bgra.len(), (w as usize) * (h as usize) * 4);
        }
    }

    #[test]
    fn canceled_token_stops_before_the_next_stage() {
        let (bgra, w, h) = checkerboard(5, 10);
        let config = PipelineConfig {
            n_segments: 50,
            ..PipelineConfig::default()
        };
        let token = CancelToken::new();
        let pipeline = Pipeline::new(bgra, w, h, config, None).unwrap();
        token.cancel();
        let err = pipeline.convert_color(&token).unwrap_err();
        assert!(matches!(err, PipelineError::Canceled { .. }));
    }

    #[test]
    fn merge_is_a_noop_without_a_threshold() {
        let (bgra, w, h) = checkerboard(5, 10);
        let config = PipelineConfig {
            n_segments: 50,
            number_of_clusters: 3,
            random_seed: 2,
            ..PipelineConfig::default()
        };
        let clustered = Pipeline::new(bgra, w, h, config, None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap()
            .cluster(&CancelToken::never())
            .unwrap();
        let before = clustered.state.centers.len();
        let merged = clustered.merge(&CancelToken::never()).unwrap();
        assert_eq!(merged.state.centers.len(), before);
    }

    #[test]
    fn branch_allows_two_merge_thresholds_from_the_same_cluster_state() {
        let (bgra, w, h) = checkerboard(5, 10);
        let config = PipelineConfig {
            n_segments: 50,
            number_of_clusters: 4,
            random_seed: 3,
            merge_threshold: Some(1.0),
            ..PipelineConfig::default()
        };
        let clustered = Pipeline::new(bgra, w, h, config, None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap()
            .cluster(&CancelToken::never())
            .unwrap();

        let loose = clustered.branch();
        let merged_tight = clustered.merge(&CancelToken::never()).unwrap();
        assert!(merged_tight.state.centers.len() <= loose.state.centers.len());
    }

    #[test]
    fn cluster_mean_colors_are_reported_in_unweighted_lab() {
        use crate::config::LabScale;

        let (bgra, w, h) = checkerboard(5, 10);
        let base = PipelineConfig {
            n_segments: 50,
            number_of_clusters: 2,
            random_seed: 1,
            ..PipelineConfig::default()
        };
        let unscaled = Pipeline::new(bgra.clone(), w, h, base.clone(), None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap()
            .cluster(&CancelToken::never())
            .unwrap()
            .extract_layers(&CancelToken::never())
            .unwrap()
            .into_result();

        let scaled_config = PipelineConfig {
            lab_scale: LabScale::emphasize_greens(),
            ..base
        };
        let scaled = Pipeline::new(bgra, w, h, scaled_config, None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap()
            .cluster(&CancelToken::never())
            .unwrap()
            .extract_layers(&CancelToken::never())
            .unwrap()
            .into_result();

        // Only `b` is scaled (x2); the clusters land the same way on this
        // fixture either way, so the reported mean colors -- which must be
        // unweighted regardless of the clustering-space scale -- should
        // match closely between the two runs.
        let mut unscaled_b: Vec<f32> = unscaled
            .metadata
            .cluster_mean_colors
            .iter()
            .map(|c| c.2)
            .collect();
        let mut scaled_b: Vec<f32> = scaled
            .metadata
            .cluster_mean_colors
            .iter()
            .map(|c| c.2)
            .collect();
        unscaled_b.sort_by(|a, b| a.partial_cmp(b).unwrap());
        scaled_b.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (a, b) in unscaled_b.iter().zip(&scaled_b) {
            assert!(
                (a - b).abs() < 1e-2,
                "reported b* mean should be unweighted regardless of lab_scale: {a} vs {b}"
            );
        }
    }

    #[test]
    fn num_superpixels_counts_only_non_empty_centers() {
        // A mostly-transparent image leaves many grid centers with zero
        // member pixels; `num_superpixels` must report the non-empty count,
        // not the raw grid size.
        let (w, h) = (40, 40);
        let mut bgra = vec![0u8; (w * h * 4) as usize];
        // Only a small corner is opaque.
        for y in 0..5usize {
            for x in 0..5usize {
                let idx = (y * w as usize + x) * 4;
                bgra[idx..idx + 4].copy_from_slice(&[0, 0, 255, 255]);
            }
        }
        let config = PipelineConfig {
            n_segments: 64,
            number_of_clusters: 2,
            random_seed: 1,
            ..PipelineConfig::default()
        };
        let segmented = Pipeline::new(bgra, w, h, config, None)
            .unwrap()
            .convert_color(&CancelToken::never())
            .unwrap()
            .segment(&CancelToken::never())
            .unwrap();

        assert!(segmented.state.num_superpixels < segmented.state.num_centers);
        assert_eq!(segmented.state.num_superpixels, segmented.state.records.len());
    }
}
