//! Value → RGB mapping for the rendering collaborator.
//!
//! Pure functions only: colors are recomputed on every decode, never cached
//! across filter or colormap changes, so they cannot go stale.

/// CALIPSO intensity encoding. LAS/LAZ stores attenuated backscatter as
/// `(physical + 0.1) * 10000` to fit an unsigned 16-bit field.
pub const INTENSITY_SCALE: f32 = 10_000.0;
pub const INTENSITY_OFFSET: f32 = 0.1;

/// Recovers physical units (km^-1 sr^-1) from the stored 16-bit value.
#[inline]
pub fn intensity_physical(raw: u16) -> f32 {
    raw as f32 / INTENSITY_SCALE - INTENSITY_OFFSET
}

/// Encodes physical units into the stored 16-bit value, saturating at the
/// representable range.
#[inline]
pub fn intensity_encode(physical: f32) -> u16 {
    ((physical + INTENSITY_OFFSET) * INTENSITY_SCALE)
        .round()
        .clamp(0.0, u16::MAX as f32) as u16
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorMode {
    /// Linear ramp over altitude (km).
    #[default]
    Elevation,
    /// Ramp over physical backscatter intensity.
    Intensity,
    /// Discrete palette keyed by classification code.
    Classification,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Colormap {
    Grayscale,
    #[default]
    Rainbow,
    Viridis,
}

/// Color mode plus ramp plus value range, passed through from the UI layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorConfig {
    pub mode: ColorMode,
    pub colormap: Colormap,
    pub min: f64,
    pub max: f64,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self { mode: ColorMode::Elevation, colormap: Colormap::Rainbow, min: 0.0, max: 30.0 }
    }
}

impl ColorConfig {
    /// Maps one decoded point to RGB under the active configuration.
    pub fn color_point(&self, alt: f64, intensity: u16, classification: u8) -> [u8; 3] {
        match self.mode {
            ColorMode::Elevation => map_color(alt, self.min, self.max, self.colormap),
            ColorMode::Intensity => {
                map_color(intensity_physical(intensity) as f64, self.min, self.max, self.colormap)
            }
            ColorMode::Classification => classification_color(classification),
        }
    }
}

/// `(value, min, max, colormap) → RGB`. Values outside the range clamp to
/// the ramp ends; a degenerate range maps everything to the low end.
pub fn map_color(value: f64, min: f64, max: f64, colormap: Colormap) -> [u8; 3] {
    let span = max - min;
    let t = if span > 0.0 { ((value - min) / span).clamp(0.0, 1.0) } else { 0.0 };
    match colormap {
        Colormap::Grayscale => {
            let v = (t * 255.0) as u8;
            [v, v, v]
        }
        Colormap::Rainbow => rainbow(t),
        Colormap::Viridis => viridis(t),
    }
}

/// Blue→cyan→green→yellow→red ramp used by the legacy browse imagery.
fn rainbow(t: f64) -> [u8; 3] {
    let (r, g, b) = if t < 0.25 {
        (0.0, 4.0 * t, 1.0)
    } else if t < 0.5 {
        (0.0, 1.0, 1.0 - 4.0 * (t - 0.25))
    } else if t < 0.75 {
        (4.0 * (t - 0.5), 1.0, 0.0)
    } else {
        (1.0, 1.0 - 4.0 * (t - 0.75), 0.0)
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

const VIRIDIS_STOPS: [[f64; 3]; 7] = [
    [0.267, 0.005, 0.329],
    [0.283, 0.141, 0.458],
    [0.254, 0.265, 0.530],
    [0.164, 0.471, 0.558],
    [0.128, 0.567, 0.551],
    [0.478, 0.821, 0.318],
    [0.993, 0.906, 0.144],
];

fn viridis(t: f64) -> [u8; 3] {
    let scaled = t * (VIRIDIS_STOPS.len() - 1) as f64;
    let i = (scaled as usize).min(VIRIDIS_STOPS.len() - 2);
    let f = scaled - i as f64;
    let a = VIRIDIS_STOPS[i];
    let b = VIRIDIS_STOPS[i + 1];
    [
        ((a[0] + (b[0] - a[0]) * f) * 255.0) as u8,
        ((a[1] + (b[1] - a[1]) * f) * 255.0) as u8,
        ((a[2] + (b[2] - a[2]) * f) * 255.0) as u8,
    ]
}

/// Fixed palette for LAS classification codes (ground, vegetation, cloud
/// layers reported by the feature mask, ...). Unknown codes hash onto a
/// stable fallback gray.
pub fn classification_color(class: u8) -> [u8; 3] {
    match class {
        0 => [120, 120, 120], // created, never classified
        1 => [180, 180, 180], // unclassified
        2 => [161, 105, 40],  // ground
        3 => [110, 180, 80],  // low vegetation
        4 => [70, 150, 50],   // medium vegetation
        5 => [40, 110, 40],   // high vegetation
        6 => [200, 60, 60],   // building
        7 => [250, 120, 40],  // low point / noise
        9 => [50, 100, 220],  // water
        64 => [220, 220, 250], // cloud
        65 => [250, 220, 120], // tropospheric aerosol
        66 => [200, 160, 250], // stratospheric layer
        _ => [90, 90, 90],
    }
}
