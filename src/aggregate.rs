//! Superpixel Aggregator (§4.C): per-label sums of color, position, and
//! count, reduced into dense superpixel feature records.
use crate::color::{LabPixel, SENTINEL_LABEL};
use crate::error::PipelineError;

use rayon::prelude::*;

/// `{ id, labColor, centerPosition, pixelCount }` per §3.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SuperpixelRecord {
    /// Dense SLIC center index this record summarizes.
    pub id: u32,
    /// Mean Lab color of the superpixel's member pixels.
    pub lab_color: (f32, f32, f32),
    /// Mean `(x, y)` position of the superpixel's member pixels.
    pub center_position: (f32, f32),
    /// Number of member pixels.
    pub pixel_count: u32,
}

#[derive(Clone, Copy, Default)]
struct Accum {
    color: LabPixel,
    x: f32,
    y: f32,
    count: u32,
}

impl std::ops::Add for Accum {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            color: self.color + rhs.color,
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            count: self.count + rhs.count,
        }
    }
}

/// Aggregate per-pixel Lab colors and positions by SLIC label into dense
/// superpixel records. `num_centers` sizes the accumulator array; records
/// for ids with zero pixels (and the sentinel label) are omitted.
///
/// Returns `(records, excluded_count)` where `excluded_count` is the number
/// of sentinel-masked pixels skipped.
pub fn aggregate(
    lab: &[LabPixel],
    labels: &[u32],
    num_centers: usize,
    width: u32,
    _height: u32,
) -> Result<(Vec<SuperpixelRecord>, usize), PipelineError> {
    let width_usize = width as usize;

    let chunk_size = (labels.len() / rayon::current_num_threads().max(1)).max(1);
    let idxs: Vec<usize> = (0..labels.len()).collect();
    let partials: Vec<(Vec<Accum>, usize)> = idxs
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut local = vec![Accum::default(); num_centers];
            let mut excluded = 0usize;
            for &i in chunk {
                let label = labels[i];
                if label == SENTINEL_LABEL {
                    excluded += 1;
                    continue;
                }
                let c = &mut local[label as usize];
                c.color = c.color + lab[i];
                c.x += (i % width_usize) as f32;
                c.y += (i / width_usize) as f32;
                c.count += 1;
            }
            (local, excluded)
        })
        .collect();

    let mut totals = vec![Accum::default(); num_centers];
    let mut excluded_count = 0usize;
    for (partial, excluded) in partials {
        excluded_count += excluded;
        for (t, p) in totals.iter_mut().zip(partial) {
            *t = *t + p;
        }
    }

    let records = totals
        .into_iter()
        .enumerate()
        .filter(|(_, acc)| acc.count > 0)
        .map(|(id, acc)| {
            let count = acc.count as f32;
            SuperpixelRecord {
                id: id as u32,
                lab_color: (acc.color.l / count, acc.color.a / count, acc.color.b / count),
                center_position: (acc.x / count, acc.y / count),
                pixel_count: acc.count,
            }
        })
        .collect();

    Ok((records, excluded_count))
}
