//! Projection between normalized (0–1) document coordinates and pixel
//! coordinates of whatever surface is currently showing the image. The live
//! overlay passes the rendered image size, the raster exporter the intrinsic
//! size; both go through the same arithmetic so they stay pixel-aligned.

use crate::model::clamp01;

/// Normalized → pixel. A pure multiplication.
pub fn to_pixel(nx: f64, ny: f64, width_px: f32, height_px: f32) -> (f32, f32) {
    (nx as f32 * width_px, ny as f32 * height_px)
}

/// Pixel → normalized, clamped into [0,1]×[0,1]. A degenerate surface maps
/// everything to the origin.
pub fn to_normalized(px: f32, py: f32, width_px: f32, height_px: f32) -> (f64, f64) {
    if width_px <= 0.0 || height_px <= 0.0 {
        return (0.0, 0.0);
    }
    (
        clamp01(px as f64 / width_px as f64),
        clamp01(py as f64 / height_px as f64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pixel_scales_by_surface_size() {
        assert_eq!(to_pixel(0.5, 0.25, 800.0, 400.0), (400.0, 100.0));
        assert_eq!(to_pixel(0.0, 1.0, 800.0, 400.0), (0.0, 400.0));
    }

    #[test]
    fn to_normalized_inverts_to_pixel() {
        let (px, py) = to_pixel(0.3, 0.7, 640.0, 480.0);
        let (nx, ny) = to_normalized(px, py, 640.0, 480.0);
        assert!((nx - 0.3).abs() < 1e-6);
        assert!((ny - 0.7).abs() < 1e-6);
    }

    #[test]
    fn to_normalized_clamps_out_of_bounds() {
        assert_eq!(to_normalized(1200.0, -30.0, 800.0, 100.0), (1.0, 0.0));
    }

    #[test]
    fn degenerate_surface_maps_to_origin() {
        assert_eq!(to_normalized(10.0, 10.0, 0.0, 0.0), (0.0, 0.0));
    }
}
