//! Demo-binary helpers for visualizing a clustering result: counting
//! distinct clusters and painting cluster-boundary contours over an RGB
//! preview image.
use crate::error::{PipelineError, Stage};
use crate::get_in_bounds;

use fxhash::FxHashSet;

/// Count distinct cluster ids in `pixel_clusters`, ignoring `u32::MAX`
/// (the extractor's "no cluster" sentinel).
pub fn count_clusters(pixel_clusters: &[u32]) -> usize {
    pixel_clusters
        .iter()
        .copied()
        .filter(|&c| c != u32::MAX)
        .collect::<FxHashSet<u32>>()
        .len()
}

/// Paint `output` (a `3 * width * height` RGB buffer) with `contour_color`
/// at every pixel with two or more 8-connected neighbors that belong to a
/// different cluster and aren't already painted as a border themselves.
pub fn cluster_contours(
    output: &mut [u8],
    width: u32,
    height: u32,
    pixel_clusters: &[u32],
    contour_color: [u8; 3],
) -> Result<(), PipelineError> {
    let stage = Stage::Driver;
    let pixel_count = (width as usize) * (height as usize);
    if output.len() != pixel_count * 3 {
        return Err(PipelineError::invalid_input(
            stage,
            "contour output buffer does not match 3 * width * height",
        ));
    }
    if pixel_clusters.len() != pixel_count {
        return Err(PipelineError::invalid_input(
            stage,
            "pixel cluster map does not match width * height",
        ));
    }

    let mut is_border = vec![false; pixel_count];
    let width_i = i64::from(width);
    let height_i = i64::from(height);

    for y in 0..height_i {
        for x in 0..width_i {
            let idx = (y * width_i + x) as usize;
            let label = pixel_clusters[idx];

            let offsets = [
                (-1, 0),
                (-1, -1),
                (0, -1),
                (1, -1),
                (1, 0),
                (1, 1),
                (0, 1),
                (-1, 1),
            ];

            let differing_unbordered = offsets
                .iter()
                .filter(|&&(dx, dy)| {
                    let nx = x + dx;
                    let ny = y + dy;
                    let neighbor_label = get_in_bounds(width_i, height_i, nx, ny, pixel_clusters);
                    let neighbor_border = get_in_bounds(width_i, height_i, nx, ny, &is_border);
                    neighbor_border == Some(&false) && neighbor_label != Some(&label)
                })
                .count();

            if differing_unbordered >= 2 {
                output[idx * 3..idx * 3 + 3].copy_from_slice(&contour_color);
                is_border[idx] = true;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_clusters_ignoring_sentinel() {
        let clusters = [0u32, 0, 1, 2, u32::MAX, u32::MAX];
        assert_eq!(count_clusters(&clusters), 3);
    }

    #[test]
    fn rejects_mismatched_output_length() {
        let clusters = [0u32; 4];
        let mut output = vec![0u8; 3];
        let err = cluster_contours(&mut output, 2, 2, &clusters, [255, 0, 0]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn paints_a_border_between_two_half_images() {
        // 4x1 image, left half cluster 0, right half cluster 1.
        let clusters = [0u32, 0, 1, 1];
        let mut output = vec![0u8; 4 * 3];
        cluster_contours(&mut output, 4, 1, &clusters, [255, 255, 255]).unwrap();
        // Pixels straddling the boundary see at most one differing
        // neighbor each in a 1-row image, so no border should be painted;
        // this mainly exercises the bounds-checked neighbor scan itself.
        assert!(output.iter().all(|&b| b == 0));
    }

    #[test]
    fn paints_a_border_in_a_checkerboard_corner() {
        // 2x2 image, four distinct clusters: every pixel has 2+ differing
        // 8-neighbors, so the corner pixel (0,0) should get painted.
        let clusters = [0u32, 1, 2, 3];
        let mut output = vec![0u8; 4 * 3];
        cluster_contours(&mut output, 2, 2, &clusters, [1, 2, 3]).unwrap();
        assert_eq!(&output[0..3], &[1, 2, 3]);
    }
}
