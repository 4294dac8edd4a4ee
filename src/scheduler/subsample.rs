//! Degraded-mode decimation for flat-loaded files.
//!
//! When no octree metadata is available the engine cannot prune by node;
//! instead a decimation stride is picked from fixed zoom (or camera
//! distance) buckets, scaled inversely by the dataset size so larger
//! files land on coarser strides at the same zoom.

/// Dataset size at which the base strides apply unscaled.
const REFERENCE_POINTS: u64 = 5_000_000;

/// `(upper zoom bound, base stride)`; zooms past the last bound render
/// every point (before size scaling).
const ZOOM_BUCKETS: &[(f64, usize)] = &[(4.0, 256), (6.0, 64), (8.0, 16), (10.0, 4)];

/// `(upper distance bound, base stride)`; beyond the last bound the
/// coarsest stride applies.
const DISTANCE_BUCKETS: &[(f64, usize)] = &[(50.0, 1), (200.0, 4), (800.0, 16), (3200.0, 64)];
const DISTANCE_FALLBACK_STRIDE: usize = 256;

fn scale_for_total(base: usize, total_points: u64) -> usize {
    let factor = (total_points / REFERENCE_POINTS).max(1) as usize;
    (base * factor).max(1)
}

/// Stride for a map-zoom level (higher zoom = closer).
pub fn stride_for_zoom(zoom: f64, total_points: u64) -> usize {
    let base = ZOOM_BUCKETS
        .iter()
        .find(|(bound, _)| zoom < *bound)
        .map(|(_, stride)| *stride)
        .unwrap_or(1);
    scale_for_total(base, total_points)
}

/// Stride for a camera distance (larger distance = further away).
pub fn stride_for_distance(distance: f64, total_points: u64) -> usize {
    let base = DISTANCE_BUCKETS
        .iter()
        .find(|(bound, _)| distance < *bound)
        .map(|(_, stride)| *stride)
        .unwrap_or(DISTANCE_FALLBACK_STRIDE);
    scale_for_total(base, total_points)
}
