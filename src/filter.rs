use crate::octree::aabb::Aabb;
use glam::{DVec2, DVec3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Bounds axis inverted: min {min} > max {max}")]
    InvertedBounds { min: f64, max: f64 },

    #[error("AOI polygon needs at least 3 vertices, got {0}")]
    DegeneratePolygon(usize),
}

/// Geographic box used both for octree-node pruning and per-point tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_alt: f64,
    pub max_alt: f64,
}

impl SpatialBounds {
    pub fn new(
        min_lon: f64,
        max_lon: f64,
        min_lat: f64,
        max_lat: f64,
        min_alt: f64,
        max_alt: f64,
    ) -> Result<Self, FilterError> {
        for (min, max) in [(min_lon, max_lon), (min_lat, max_lat), (min_alt, max_alt)] {
            if min > max {
                return Err(FilterError::InvertedBounds { min, max });
            }
        }
        Ok(Self { min_lon, max_lon, min_lat, max_lat, min_alt, max_alt })
    }

    pub fn contains(&self, lon: f64, lat: f64, alt: f64) -> bool {
        lon >= self.min_lon
            && lon <= self.max_lon
            && lat >= self.min_lat
            && lat <= self.max_lat
            && alt >= self.min_alt
            && alt <= self.max_alt
    }

    /// Node-level pruning test against a lon/lat/alt bounding box.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.as_aabb().intersects(aabb)
    }

    pub fn as_aabb(&self) -> Aabb {
        Aabb::new(
            DVec3::new(self.min_lon, self.min_lat, self.min_alt),
            DVec3::new(self.max_lon, self.max_lat, self.max_alt),
        )
    }
}

/// Scalar interval filter, the shared shape of the time-range and
/// height filters. Disabled filters accept everything.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RangeFilter {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
}

impl RangeFilter {
    pub fn enabled(min: f64, max: f64) -> Self {
        Self { enabled: true, min, max }
    }

    pub fn accepts(&self, value: f64) -> bool {
        !self.enabled || (value >= self.min && value <= self.max)
    }
}

/// Area-of-interest polygon in lon/lat, for point-level refinement beyond
/// the bounding box. Containment by ray casting against an arbitrary
/// simple polygon.
#[derive(Clone, Debug, PartialEq)]
pub struct AoiPolygon {
    vertices: Vec<DVec2>,
}

impl AoiPolygon {
    pub fn new(vertices: Vec<DVec2>) -> Result<Self, FilterError> {
        if vertices.len() < 3 {
            return Err(FilterError::DegeneratePolygon(vertices.len()));
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[DVec2] {
        &self.vertices
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];
            if ((a.y > lat) != (b.y > lat))
                && lon < (b.x - a.x) * (lat - a.y) / (b.y - a.y) + a.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// The active per-point predicate set, applied during decode. Changing any
/// member invalidates loaded nodes — filtering is never applied post-hoc
/// to cached blocks.
#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    pub bounds: Option<SpatialBounds>,
    pub height: RangeFilter,
    pub time: RangeFilter,
    pub polygon: Option<AoiPolygon>,
}

impl FilterSet {
    /// Full per-point acceptance test: finiteness, geographic range,
    /// spatial/height/time filters, then AOI containment.
    pub fn accepts(&self, lon: f64, lat: f64, alt: f64, gps_time: f64) -> bool {
        if !lon.is_finite() || !lat.is_finite() || !alt.is_finite() {
            return false;
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return false;
        }
        if let Some(bounds) = &self.bounds {
            if !bounds.contains(lon, lat, alt) {
                return false;
            }
        }
        if !self.height.accepts(alt) || !self.time.accepts(gps_time) {
            return false;
        }
        if let Some(polygon) = &self.polygon {
            if !polygon.contains(lon, lat) {
                return false;
            }
        }
        true
    }

    /// Node-level pruning: can any point of a node with this box pass?
    pub fn intersects_node(&self, aabb: &Aabb) -> bool {
        match &self.bounds {
            Some(bounds) => bounds.intersects_aabb(aabb),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(SpatialBounds::new(10.0, -10.0, 0.0, 1.0, 0.0, 1.0).is_err());
        assert!(SpatialBounds::new(-10.0, 10.0, 0.0, 1.0, 0.0, 1.0).is_ok());
    }

    #[test]
    fn square_aoi_polygon() {
        let square = AoiPolygon::new(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(0.0, 1.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(1.0, 0.0),
        ])
        .unwrap();
        assert!(square.contains(0.5, 0.5));
        assert!(!square.contains(2.0, 2.0));
        assert!(!square.contains(-0.5, 0.5));
    }

    #[test]
    fn polygon_needs_three_vertices() {
        assert!(AoiPolygon::new(vec![DVec2::ZERO, DVec2::ONE]).is_err());
    }

    #[test]
    fn filter_set_drops_non_finite_and_out_of_range() {
        let filters = FilterSet::default();
        assert!(filters.accepts(10.0, 20.0, 5.0, 0.0));
        assert!(!filters.accepts(f64::NAN, 20.0, 5.0, 0.0));
        assert!(!filters.accepts(10.0, f64::INFINITY, 5.0, 0.0));
        assert!(!filters.accepts(181.0, 0.0, 5.0, 0.0));
        assert!(!filters.accepts(0.0, -90.5, 5.0, 0.0));
    }

    #[test]
    fn disabled_range_filter_accepts_everything() {
        let filter = RangeFilter::default();
        assert!(filter.accepts(f64::MAX));
        let enabled = RangeFilter::enabled(0.0, 10.0);
        assert!(enabled.accepts(10.0));
        assert!(!enabled.accepts(10.1));
    }

    #[test]
    fn combined_filters_compose() {
        let mut filters = FilterSet {
            bounds: Some(SpatialBounds::new(-10.0, 10.0, -10.0, 10.0, 0.0, 30.0).unwrap()),
            height: RangeFilter::enabled(0.0, 20.0),
            time: RangeFilter::enabled(100.0, 200.0),
            polygon: None,
        };
        assert!(filters.accepts(0.0, 0.0, 10.0, 150.0));
        assert!(!filters.accepts(11.0, 0.0, 10.0, 150.0)); // outside bounds
        assert!(!filters.accepts(0.0, 0.0, 25.0, 150.0)); // above height cap
        assert!(!filters.accepts(0.0, 0.0, 10.0, 250.0)); // outside time range

        filters.polygon = Some(
            AoiPolygon::new(vec![
                DVec2::new(0.0, 0.0),
                DVec2::new(0.0, 1.0),
                DVec2::new(1.0, 1.0),
                DVec2::new(1.0, 0.0),
            ])
            .unwrap(),
        );
        assert!(filters.accepts(0.5, 0.5, 10.0, 150.0));
        assert!(!filters.accepts(5.0, 5.0, 10.0, 150.0)); // in bounds, outside AOI
    }
}
