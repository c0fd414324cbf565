//! Decomposes a raster icon into color-coherent, spatially contiguous
//! layers.
//!
//! The crate implements the staged, data-parallel segmentation pipeline
//! described in the accompanying design docs: a BGRA8 icon is converted to
//! a perceptual color space, segmented into SLIC superpixels, aggregated
//! into per-superpixel feature records, clustered into a small palette,
//! optionally merged down further, and finally split into one transparent
//! layer image per cluster.
//!
//! ## Usage
//!
//! ```
//! use icon_layers::config::PipelineConfig;
//! use icon_layers::pipeline::{CancelToken, Pipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (width, height) = (2, 2);
//! let bgra = vec![
//!     0, 0, 255, 255, 0, 0, 255, 255, // red row
//!     255, 0, 0, 255, 255, 0, 0, 255, // blue row
//! ];
//! let config = PipelineConfig {
//!     n_segments: 50,
//!     number_of_clusters: 2,
//!     random_seed: 1,
//!     ..PipelineConfig::default()
//! };
//!
//! let result = Pipeline::new(bgra, width, height, config, None)?
//!     .convert_color(&CancelToken::never())?
//!     .segment(&CancelToken::never())?
//!     .cluster(&CancelToken::never())?
//!     .extract_layers(&CancelToken::never())?
//!     .into_result();
//!
//! assert_eq!(result.layers.len(), result.metadata.final_k);
//! # Ok(())
//! # }
//! ```
#![forbid(
    absolute_paths_not_starting_with_crate,
    non_ascii_idents,
    noop_method_call,
    unsafe_code
)]
#![warn(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

pub mod aggregate;
pub mod cluster;
pub mod color;
pub mod config;
pub mod error;
pub mod extract;
pub mod image;
pub mod merge;
pub mod pipeline;
pub mod seed;
mod slic;

/// Checks if `(x, y)` is in bounds of a `width`-wide buffer and returns a
/// reference to the element there if it exists.
#[inline]
pub(crate) fn get_in_bounds<T>(width: i64, _height: i64, x: i64, y: i64, image: &[T]) -> Option<&T> {
    if (0..width).contains(&x) {
        let i = u64::try_from(y)
            .ok()?
            .checked_mul(u64::try_from(width).ok()?)?
            .checked_add(u64::try_from(x).ok()?)
            .and_then(|i| usize::try_from(i).ok())?;
        image.get(i)
    } else {
        None
    }
}

/// Mutable counterpart of [`get_in_bounds`].
#[inline]
pub(crate) fn get_mut_in_bounds<T>(
    width: i64,
    _height: i64,
    x: i64,
    y: i64,
    image: &mut [T],
) -> Option<&mut T> {
    if (0..width).contains(&x) {
        let i = u64::try_from(y)
            .ok()?
            .checked_mul(u64::try_from(width).ok()?)?
            .checked_add(u64::try_from(x).ok()?)
            .and_then(|i| usize::try_from(i).ok())?;
        image.get_mut(i)
    } else {
        None
    }
}

/// Quotient of `lhs` and `rhs`, rounded towards positive infinity.
// FIXME: Remove when `u32::div_ceil` is usable on this crate's MSRV.
#[inline]
pub(crate) fn div_ceil_u32(lhs: u32, rhs: u32) -> u32 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if r > 0 { d + 1 } else { d }
}
