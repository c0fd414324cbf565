//! SLIC seed perturbation (§4.B initialization).
use crate::color::{distance_lab, LabPixel};
use crate::get_in_bounds;

/// A SLIC seed center: its pixel position and Lab color.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedCenter {
    /// Lab color at the center.
    pub color: LabPixel,
    /// X pixel coordinate.
    pub x: u32,
    /// Y pixel coordinate.
    pub y: u32,
}

/// Move `seed` to the position in its 3x3 neighborhood with the lowest
/// color gradient, to avoid anchoring a center on a noisy pixel.
///
/// Gradient at `(x, y)` is `‖Lab[x+1,y] − Lab[x-1,y]‖² + ‖Lab[x,y+1] −
/// Lab[x,y-1]‖²`, per §4.B.
pub fn perturb(seed: &mut SeedCenter, width: i64, height: i64, image: &[LabPixel]) {
    let mut min = f32::INFINITY;
    let default = LabPixel::default();
    let sp_x = i64::from(seed.x);
    let sp_y = i64::from(seed.y);

    for ydx in -1..=1 {
        for xdx in -1..=1 {
            let cx = sp_x + xdx;
            let cy = sp_y + ydx;
            let Some(&color) = get_in_bounds(width, height, cx, cy, image) else {
                continue;
            };

            let a = *get_in_bounds(width, height, cx + 1, cy, image).unwrap_or(&default);
            let b = *get_in_bounds(width, height, cx - 1, cy, image).unwrap_or(&default);
            let c = *get_in_bounds(width, height, cx, cy + 1, image).unwrap_or(&default);
            let d = *get_in_bounds(width, height, cx, cy - 1, image).unwrap_or(&default);

            let gradient = distance_lab(a, b) + distance_lab(c, d);
            if gradient < min {
                min = gradient;
                seed.color = color;
                // cx, cy are in [0, width) x [0, height) here since
                // get_in_bounds only returned Some for in-bounds indices,
                // and width/height are validated u32s.
                seed.x = cx as u32;
                seed.y = cy as u32;
            }
        }
    }
}
