//! Color Converter (§4.A): BGRA8 → Gaussian-presmoothed, scaled L*a*b*.
use crate::config::LabScale;
use crate::error::{PipelineError, Stage};

use rayon::prelude::*;

/// A single `(L, a, b)` sample of the Lab buffer (§3).
///
/// After [`PipelineConfig::lab_scale`](crate::config::PipelineConfig) is
/// applied this is no longer a colorimetric Lab value in general — it is a
/// scaled feature used to bias downstream distance, exactly as §4.A
/// prescribes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LabPixel {
    /// Lightness, nominally `[0, 100]` before scaling.
    pub l: f32,
    /// Green↔red axis, nominally `≈[-128, 127]` before scaling.
    pub a: f32,
    /// Blue↔yellow axis, nominally `≈[-128, 127]` before scaling.
    pub b: f32,
}

impl LabPixel {
    #[inline]
    fn scaled(self, scale: LabScale) -> Self {
        Self {
            l: self.l * scale.l,
            a: self.a * scale.a,
            b: self.b * scale.b,
        }
    }
}

impl std::ops::Sub for LabPixel {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            l: self.l - rhs.l,
            a: self.a - rhs.a,
            b: self.b - rhs.b,
        }
    }
}

impl std::ops::Add for LabPixel {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            l: self.l + rhs.l,
            a: self.a + rhs.a,
            b: self.b + rhs.b,
        }
    }
}

impl std::ops::Div<f32> for LabPixel {
    type Output = Self;
    #[inline]
    fn div(self, rhs: f32) -> Self {
        Self {
            l: self.l / rhs,
            a: self.a / rhs,
            b: self.b / rhs,
        }
    }
}

/// Squared Euclidean distance between two Lab samples.
#[inline]
pub(crate) fn distance_lab(lhs: LabPixel, rhs: LabPixel) -> f32 {
    let d = rhs - lhs;
    d.l * d.l + d.a * d.a + d.b * d.b
}

/// Reserved label marking pixels the pipeline must exclude (§3).
pub const SENTINEL_LABEL: u32 = 0xFFFF_FFFE;

// 3x3 Gaussian kernel, sigma ~= 0.5, normalized.
const KERNEL_CENTER: f32 = 0.619;
const KERNEL_EDGE: f32 = 0.0838;
const KERNEL_CORNER: f32 = 0.0113;

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_to_xyz(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    // sRGB, D65, standard linear RGB -> XYZ matrix.
    let x = 0.4124564 * r + 0.3575761 * g + 0.1804375 * b;
    let y = 0.2126729 * r + 0.7151522 * g + 0.0721750 * b;
    let z = 0.0193339 * r + 0.1191920 * g + 0.9503041 * b;
    (x, y, z)
}

const WHITE_X: f32 = 95.047;
const WHITE_Y: f32 = 100.000;
const WHITE_Z: f32 = 108.883;

#[inline]
fn lab_f(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

#[inline]
fn xyz_to_lab(x: f32, y: f32, z: f32) -> LabPixel {
    let fx = lab_f(x / WHITE_X);
    let fy = lab_f(y / WHITE_Y);
    let fz = lab_f(z / WHITE_Z);
    LabPixel {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// Clamp-at-border 3x3 Gaussian presmooth of the BGR channels, reading
/// `u8` BGRA source pixels and producing `(b, g, r)` in `[0, 1]`.
fn presmooth_bgr(bgra: &[u8], width: u32, height: u32) -> Vec<(f32, f32, f32)> {
    let width = width as i64;
    let height = height as i64;
    let at = |x: i64, y: i64| -> (f32, f32, f32) {
        let cx = x.clamp(0, width - 1);
        let cy = y.clamp(0, height - 1);
        let idx = ((cy * width + cx) * 4) as usize;
        (
            f32::from(bgra[idx]) / 255.0,
            f32::from(bgra[idx + 1]) / 255.0,
            f32::from(bgra[idx + 2]) / 255.0,
        )
    };

    (0..height * width)
        .into_par_iter()
        .map(|i| {
            let x = i % width;
            let y = i / width;
            let weights: [(i64, i64, f32); 9] = [
                (-1, -1, KERNEL_CORNER),
                (0, -1, KERNEL_EDGE),
                (1, -1, KERNEL_CORNER),
                (-1, 0, KERNEL_EDGE),
                (0, 0, KERNEL_CENTER),
                (1, 0, KERNEL_EDGE),
                (-1, 1, KERNEL_CORNER),
                (0, 1, KERNEL_EDGE),
                (1, 1, KERNEL_CORNER),
            ];
            let mut sum = (0.0f32, 0.0f32, 0.0f32);
            for (dx, dy, w) in weights {
                let (b, g, r) = at(x + dx, y + dy);
                sum.0 += b * w;
                sum.1 += g * w;
                sum.2 += r * w;
            }
            sum
        })
        .collect()
}

/// Convert a BGRA8 pixel buffer into the pipeline's Lab feature buffer plus
/// a transparency mask, per §4.A.
///
/// Fails with [`PipelineError::InvalidInput`] if the dimensions are
/// nonpositive or `bgra.len() != 4 * width * height`.
pub fn convert(
    bgra: &[u8],
    width: u32,
    height: u32,
    scale: LabScale,
) -> Result<(Vec<LabPixel>, Vec<bool>), PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::invalid_input(
            Stage::ColorConvert,
            "width and height must both be nonzero",
        ));
    }
    let expected = 4usize
        .checked_mul(width as usize)
        .and_then(|v| v.checked_mul(height as usize))
        .ok_or_else(|| {
            PipelineError::invalid_input(Stage::ColorConvert, "width * height overflows usize")
        })?;
    if bgra.len() != expected {
        return Err(PipelineError::invalid_input(
            Stage::ColorConvert,
            format!(
                "pixel buffer length {} does not equal 4*width*height ({})",
                bgra.len(),
                expected
            ),
        ));
    }

    log::debug!("color converter: {width}x{height}, presmoothing");
    let smoothed = presmooth_bgr(bgra, width, height);

    let lab: Vec<LabPixel> = smoothed
        .into_par_iter()
        .map(|(b, g, r)| {
            let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));
            let (x, y, z) = linear_to_xyz(r, g, b);
            xyz_to_lab(x * 100.0, y * 100.0, z * 100.0).scaled(scale)
        })
        .collect();

    let mask: Vec<bool> = bgra
        .par_chunks_exact(4)
        .map(|px| px[3] == 0)
        .collect();

    Ok((lab, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        let err = convert(&[], 0, 4, LabScale::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_mismatched_buffer_length() {
        let err = convert(&[0; 10], 2, 2, LabScale::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn black_converts_to_zero_lab() {
        let bgra = vec![0u8, 0, 0, 255];
        let (lab, mask) = convert(&bgra, 1, 1, LabScale::default()).unwrap();
        assert_eq!(mask, vec![false]);
        assert!(lab[0].l.abs() < 1e-3);
        assert!(lab[0].a.abs() < 1e-3);
        assert!(lab[0].b.abs() < 1e-3);
    }

    #[test]
    fn white_converts_to_full_lightness() {
        let bgra = vec![255u8, 255, 255, 255];
        let (lab, _mask) = convert(&bgra, 1, 1, LabScale::default()).unwrap();
        assert!((lab[0].l - 100.0).abs() < 1e-2);
        assert!(lab[0].a.abs() < 1e-2);
        assert!(lab[0].b.abs() < 1e-2);
    }

    #[test]
    fn transparent_alpha_marks_mask() {
        let bgra = vec![10u8, 20, 30, 0];
        let (_lab, mask) = convert(&bgra, 1, 1, LabScale::default()).unwrap();
        assert_eq!(mask, vec![true]);
    }

    #[test]
    fn lab_scale_is_applied_after_conversion() {
        let bgra = vec![255u8, 255, 255, 255];
        let (unscaled, _) = convert(&bgra, 1, 1, LabScale::default()).unwrap();
        let scale = LabScale {
            l: 1.0,
            a: 1.0,
            b: 2.0,
        };
        let (scaled, _) = convert(&bgra, 1, 1, scale).unwrap();
        assert!((scaled[0].b - unscaled[0].b * 2.0).abs() < 1e-4);
    }
}
