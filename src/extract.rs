//! Layer Extractor (§4.F): splits the source image into one transparent
//! BGRA8 buffer per final cluster.
use crate::error::{PipelineError, Stage};

use rayon::prelude::*;

/// One extracted layer: a BGRA8 buffer the same dimensions as the source
/// image, transparent everywhere outside its cluster.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Final cluster id this layer was extracted for.
    pub cluster_id: u32,
    /// `width * height * 4` BGRA8 bytes.
    pub bgra: Vec<u8>,
}

/// Split `source` into one layer per id in `0..num_clusters`, using
/// `pixel_clusters` (one entry per pixel, or a sentinel value `>=
/// num_clusters` for pixels assigned to no cluster, which stay transparent
/// in every layer).
///
/// Pixels outside a layer's cluster are written as `(0, 0, 0, 0)`; member
/// pixels keep the source image's original color and alpha.
pub fn extract(
    source: &[u8],
    width: u32,
    height: u32,
    pixel_clusters: &[u32],
    num_clusters: usize,
) -> Result<Vec<Layer>, PipelineError> {
    let stage = Stage::Extract;
    let pixel_count = (width as usize) * (height as usize);
    if source.len() != pixel_count * 4 {
        return Err(PipelineError::invalid_input(
            stage,
            format!(
                "source buffer length {} does not match {width}x{height} BGRA8",
                source.len()
            ),
        ));
    }
    if pixel_clusters.len() != pixel_count {
        return Err(PipelineError::invalid_input(
            stage,
            "pixel cluster map length does not match width * height",
        ));
    }
    if num_clusters == 0 {
        return Err(PipelineError::invalid_input(stage, "no clusters to extract"));
    }

    log::debug!("extract: {num_clusters} layers over {pixel_count} pixels");

    let layers = (0..num_clusters)
        .into_par_iter()
        .map(|cluster_id| {
            let mut bgra = vec![0u8; source.len()];
            for (pixel, &assigned) in pixel_clusters.iter().enumerate() {
                if assigned as usize == cluster_id {
                    let base = pixel * 4;
                    bgra[base..base + 4].copy_from_slice(&source[base..base + 4]);
                }
            }
            Layer {
                cluster_id: cluster_id as u32,
                bgra,
            }
        })
        .collect();

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_source_length() {
        let err = extract(&[0u8; 3], 2, 2, &[0, 0, 0, 0], 1).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_mismatched_cluster_map_length() {
        let source = vec![0u8; 2 * 2 * 4];
        let err = extract(&source, 2, 2, &[0, 0, 0], 1).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn splits_two_clusters_into_disjoint_layers() {
        // 1x2 image: top pixel red, bottom pixel blue.
        let source = vec![
            0, 0, 255, 255, // red, BGRA
            255, 0, 0, 255, // blue, BGRA
        ];
        let clusters = [0u32, 1];
        let layers = extract(&source, 1, 2, &clusters, 2).unwrap();
        assert_eq!(layers.len(), 2);

        let red_layer = &layers[0].bgra;
        assert_eq!(&red_layer[0..4], &[0, 0, 255, 255]);
        assert_eq!(&red_layer[4..8], &[0, 0, 0, 0]);

        let blue_layer = &layers[1].bgra;
        assert_eq!(&blue_layer[0..4], &[0, 0, 0, 0]);
        assert_eq!(&blue_layer[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn unassigned_sentinel_pixels_are_transparent_everywhere() {
        let source = vec![0, 0, 255, 255, 255, 0, 0, 255];
        // pixel 1 assigned to a cluster id beyond num_clusters: never matched.
        let clusters = [0u32, 99];
        let layers = extract(&source, 1, 2, &clusters, 1).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(&layers[0].bgra[4..8], &[0, 0, 0, 0]);
    }
}
