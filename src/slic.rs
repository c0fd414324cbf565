//! SLIC Segmenter (§4.B): iterative k-means in joint (color, position[,
//! depth]) space producing a per-pixel superpixel label.
use crate::color::{distance_lab, LabPixel, SENTINEL_LABEL};
use crate::config::PipelineConfig;
use crate::div_ceil_u32;
use crate::error::{PipelineError, Stage};
use crate::seed::{perturb, SeedCenter};

use num_traits::ToPrimitive;
use rayon::prelude::*;

/// Output of the SLIC segmenter.
pub struct SlicOutput {
    /// Per-pixel superpixel label, or [`SENTINEL_LABEL`] for excluded
    /// pixels.
    pub labels: Vec<u32>,
    /// Number of candidate centers placed on the grid (labels are dense in
    /// `[0, num_centers)`, though some may end up with zero pixels).
    pub num_centers: usize,
}

#[derive(Clone, Copy, Default)]
struct Accum {
    color: LabPixel,
    x: f32,
    y: f32,
    depth: f32,
    count: f32,
}

impl std::ops::Add for Accum {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            color: self.color + rhs.color,
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            depth: self.depth + rhs.depth,
            count: self.count + rhs.count,
        }
    }
}

/// Run SLIC over `lab`, respecting `mask` (transparency-excluded pixels)
/// and the optional `depth` scalar buffer.
///
/// Validates `config.n_segments`, `config.compactness`,
/// `config.slic_iterations`, `config.depth_weight`, and the derived grid
/// spacing, returning [`PipelineError::InvalidInput`] on violation.
pub fn run(
    lab: &[LabPixel],
    mask: &[bool],
    width: u32,
    height: u32,
    depth: Option<&[f32]>,
    config: &PipelineConfig,
) -> Result<SlicOutput, PipelineError> {
    let stage = Stage::Slic;
    if !(50..=10_000).contains(&config.n_segments) {
        return Err(PipelineError::invalid_input(
            stage,
            format!("nSegments {} not in [50, 10000]", config.n_segments),
        ));
    }
    if config.compactness <= 0.0 || config.compactness > 100.0 {
        return Err(PipelineError::invalid_input(
            stage,
            format!("compactness {} not in (0, 100]", config.compactness),
        ));
    }
    if !(1..=30).contains(&config.slic_iterations) {
        return Err(PipelineError::invalid_input(
            stage,
            format!("slicIterations {} not in [1, 30]", config.slic_iterations),
        ));
    }
    if !(0.0..=1.0).contains(&config.depth_weight) {
        return Err(PipelineError::invalid_input(
            stage,
            format!("depthWeight {} not in [0, 1]", config.depth_weight),
        ));
    }

    let pixel_count = u64::from(width) * u64::from(height);
    if u64::from(config.n_segments) > pixel_count {
        return Err(PipelineError::invalid_input(
            stage,
            "nSegments exceeds the number of pixels in the image",
        ));
    }

    let grid_spacing = ((pixel_count as f64) / f64::from(config.n_segments))
        .sqrt()
        .floor()
        .to_u32()
        .ok_or_else(|| PipelineError::invalid_input(stage, "grid spacing overflowed u32"))?;
    if grid_spacing < 2 {
        return Err(PipelineError::invalid_input(
            stage,
            "derived grid spacing is smaller than 2",
        ));
    }

    let search_region = 2 * grid_spacing;
    let search_range = i64::from(search_region / grid_spacing + 1); // = 3
    let grid_w = div_ceil_u32(width, grid_spacing);
    let grid_h = div_ceil_u32(height, grid_spacing);
    let num_centers = (grid_w as usize) * (grid_h as usize);
    let spatial_weight = config.compactness / grid_spacing as f32;
    let depth_weight_sq = config.depth_weight * config.depth_weight;

    log::debug!(
        "slic: {width}x{height}, grid={grid_spacing} ({grid_w}x{grid_h}={num_centers} centers), {} iterations",
        config.slic_iterations
    );

    let width_i = i64::from(width);
    let height_i = i64::from(height);
    let width_usize = width as usize;

    // Place centers at cell midpoints, then perturb to the lowest-gradient
    // pixel in each center's 3x3 neighborhood.
    let mut centers: Vec<SeedCenter> = Vec::with_capacity(num_centers);
    let mut center_depth: Vec<f32> = Vec::with_capacity(num_centers);
    for gy in 0..grid_h {
        for gx in 0..grid_w {
            let x = (gx * grid_spacing + grid_spacing / 2).min(width - 1);
            let y = (gy * grid_spacing + grid_spacing / 2).min(height - 1);
            let idx = (y as usize) * width_usize + (x as usize);
            let mut seed = SeedCenter {
                color: lab[idx],
                x,
                y,
            };
            perturb(&mut seed, width_i, height_i, lab);
            center_depth.push(depth.map_or(0.0, |d| {
                d[(seed.y as usize) * width_usize + seed.x as usize]
            }));
            centers.push(seed);
        }
    }

    let mut labels = vec![0u32; lab.len()];
    let idxs: Vec<usize> = (0..lab.len()).collect();

    for iteration in 0..config.slic_iterations {
        log::trace!("slic: iteration {iteration}");

        // Assignment pass: pixel-parallel, each pixel writes only its own
        // label, so no synchronization is required across threads.
        labels = idxs
            .par_iter()
            .map(|&i| {
                if mask[i] {
                    return SENTINEL_LABEL;
                }
                let x = (i % width_usize) as u32;
                let y = (i / width_usize) as u32;
                let pcx = i64::from(x / grid_spacing);
                let pcy = i64::from(y / grid_spacing);

                let mut best_label = 0u32;
                let mut best_distance = f32::INFINITY;

                for ncy in (pcy - search_range)..=(pcy + search_range) {
                    if ncy < 0 || ncy >= i64::from(grid_h) {
                        continue;
                    }
                    for ncx in (pcx - search_range)..=(pcx + search_range) {
                        if ncx < 0 || ncx >= i64::from(grid_w) {
                            continue;
                        }
                        let center_idx = (ncy as usize) * (grid_w as usize) + (ncx as usize);
                        let center = centers[center_idx];
                        let dx = x as f32 - center.x as f32;
                        let dy = y as f32 - center.y as f32;
                        let spatial_sq = dx * dx + dy * dy;
                        if spatial_sq.sqrt() >= search_region as f32 {
                            continue;
                        }
                        let color_sq = distance_lab(lab[i], center.color);
                        let mut total_sq =
                            color_sq + spatial_sq * spatial_weight * spatial_weight;
                        if depth_weight_sq > 0.0 {
                            if let Some(d) = depth {
                                let dd = d[i] - center_depth[center_idx];
                                total_sq += depth_weight_sq * dd * dd;
                            }
                        }
                        let distance = total_sq.sqrt();
                        if distance < best_distance {
                            best_distance = distance;
                            best_label = center_idx as u32;
                        }
                    }
                }
                best_label
            })
            .collect();

        // Update pass: deterministic partitioned reduction. Each chunk
        // accumulates its own per-center totals; chunks are then folded in
        // ascending index order on the calling thread, so the result does
        // not depend on how work was scheduled across threads (P3).
        let chunk_size = (idxs.len() / rayon::current_num_threads().max(1)).max(1);
        let partials: Vec<Vec<Accum>> = idxs
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut local = vec![Accum::default(); num_centers];
                for &i in chunk {
                    let label = labels[i];
                    if label == SENTINEL_LABEL {
                        continue;
                    }
                    let c = &mut local[label as usize];
                    c.color = c.color + lab[i];
                    c.x += (i % width_usize) as f32;
                    c.y += (i / width_usize) as f32;
                    if let Some(d) = depth {
                        c.depth += d[i];
                    }
                    c.count += 1.0;
                }
                local
            })
            .collect();

        let mut totals = vec![Accum::default(); num_centers];
        for partial in partials {
            for (t, p) in totals.iter_mut().zip(partial) {
                *t = *t + p;
            }
        }

        for ((center, cdepth), total) in centers
            .iter_mut()
            .zip(center_depth.iter_mut())
            .zip(totals.iter())
        {
            if total.count == 0.0 {
                continue;
            }
            center.color = total.color / total.count;
            center.x = (total.x / total.count).round() as u32;
            center.y = (total.y / total.count).round() as u32;
            *cdepth = total.depth / total.count;
        }
    }

    if config.enforce_connectivity {
        labels = enforce_connectivity(width, height, &labels);
    }

    Ok(SlicOutput {
        labels,
        num_centers,
    })
}

/// Single-pass connectivity fixup (§4.B): a pixel with zero same-label
/// 4-neighbors adopts the first differing neighbor's label. Reads from a
/// snapshot so reassignments within the pass never cascade.
fn enforce_connectivity(width: u32, height: u32, labels: &[u32]) -> Vec<u32> {
    let width_i = i64::from(width);
    let height_i = i64::from(height);
    let width_usize = width as usize;

    (0..labels.len())
        .into_par_iter()
        .map(|i| {
            let label = labels[i];
            if label == SENTINEL_LABEL {
                return label;
            }
            let x = (i % width_usize) as i64;
            let y = (i / width_usize) as i64;
            let neighbors = [(-1, 0), (0, -1), (1, 0), (0, 1)];
            let mut same = 0;
            let mut first_different = None;
            for (dx, dy) in neighbors {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || nx >= width_i || ny < 0 || ny >= height_i {
                    continue;
                }
                let n_label = labels[(ny as usize) * width_usize + (nx as usize)];
                if n_label == label {
                    same += 1;
                } else if first_different.is_none() && n_label != SENTINEL_LABEL {
                    first_different = Some(n_label);
                }
            }
            if same == 0 {
                first_different.unwrap_or(label)
            } else {
                label
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::convert;
    use crate::config::LabScale;

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
    fn rejects_oversized_segment_count() {
        let (bgra, w, h) = checkerboard(2, 2);
        let (lab, mask) = convert(&bgra, w, h, LabScale::default()).unwrap();
        let config = PipelineConfig {
            n_segments: 50,
            ..PipelineConfig::default()
        };
        let err = run(&lab, &mask, w, h, None, &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_out_of_range_compactness() {
        let (bgra, w, h) = checkerboard(5, 10);
        let (lab, mask) = convert(&bgra, w, h, LabScale::default()).unwrap();
        let config = PipelineConfig {
            n_segments: 50,
            compactness: 0.0,
            ..PipelineConfig::default()
        };
        let err = run(&lab, &mask, w, h, None, &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn every_non_sentinel_pixel_gets_a_valid_label() {
        let (bgra, w, h) = checkerboard(5, 10); // 50x50 = 2500 px
        let (lab, mask) = convert(&bgra, w, h, LabScale::default()).unwrap();
        let config = PipelineConfig {
            n_segments: 50,
            ..PipelineConfig::default()
        };
        let out = run(&lab, &mask, w, h, None, &config).unwrap();
        assert!(out
            .labels
            .iter()
            .all(|&l| l != SENTINEL_LABEL && (l as usize) < out.num_centers));
    }

    #[test]
    fn fully_transparent_pixels_get_sentinel_label() {
        let bgra = vec![0u8; 4 * 16 * 16];
        let (lab, mask) = convert(&bgra, 16, 16, LabScale::default()).unwrap();
        let config = PipelineConfig {
            n_segments: 50,
            ..PipelineConfig::default()
        };
        let out = run(&lab, &mask, 16, 16, None, &config).unwrap();
        assert!(out.labels.iter().all(|&l| l == SENTINEL_LABEL));
    }

    #[test]
    fn depth_term_is_incorporated_without_breaking_label_validity() {
        // Uniform color, so without a depth term every pixel's assignment
        // is driven purely by spatial proximity to its grid cell. Split the
        // depth buffer sharply down the middle and confirm SLIC still
        // produces a fully valid label buffer with the depth term enabled.
        let (template, w, h) = checkerboard(5, 10);
        let bgra = vec![128u8; template.len()];
        let (lab, mask) = convert(&bgra, w, h, LabScale::default()).unwrap();
        let depth: Vec<f32> = (0..(w * h))
            .map(|i| if (i % w) < w / 2 { 0.0 } else { 1.0 })
            .collect();
        let config = PipelineConfig {
            n_segments: 50,
            depth_weight: 0.8,
            ..PipelineConfig::default()
        };
        let out = run(&lab, &mask, w, h, Some(&depth), &config).unwrap();
        assert!(out
            .labels
            .iter()
            .all(|&l| l != SENTINEL_LABEL && (l as usize) < out.num_centers));
    }

    #[test]
    fn rejects_out_of_range_depth_weight() {
        let (bgra, w, h) = checkerboard(5, 10);
        let (lab, mask) = convert(&bgra, w, h, LabScale::default()).unwrap();
        let config = PipelineConfig {
            n_segments: 50,
            depth_weight: 1.5,
            ..PipelineConfig::default()
        };
        let err = run(&lab, &mask, w, h, None, &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }
}
