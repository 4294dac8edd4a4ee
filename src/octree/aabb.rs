use glam::DVec3;

/// Axis-aligned box in the point cloud's native coordinate space.
/// For CALIPSO tracks the axes are lon (x), lat (y), alt (z).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Largest edge length, the node-size term of the screen-space error proxy.
    pub fn max_extent(&self) -> f64 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }
}

/// Child octant bit convention: bit 2 selects the upper x half,
/// bit 1 the upper y half, bit 0 the upper z half.
pub fn create_child_aabb(aabb: &Aabb, index: usize) -> Aabb {
    let mut min = aabb.min;
    let mut max = aabb.max;
    let size = (max - min) * 0.5;

    if (index & 0b0001) > 0 {
        min.z += size.z;
    } else {
        max.z -= size.z;
    }
    if (index & 0b0010) > 0 {
        min.y += size.y;
    } else {
        max.y -= size.y;
    }
    if (index & 0b0100) > 0 {
        min.x += size.x;
    } else {
        max.x -= size.x;
    }

    Aabb::new(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_octants_are_contained_and_halved() {
        let root = Aabb::new(DVec3::new(-180.0, -90.0, 0.0), DVec3::new(180.0, 270.0, 360.0));
        for index in 0..8 {
            let child = create_child_aabb(&root, index);
            assert!(root.contains_aabb(&child), "octant {index} escapes parent");
            let s = child.size();
            assert_eq!(s, root.size() * 0.5, "octant {index} is not a half cube");
        }
    }

    #[test]
    fn octant_bits_map_to_axes() {
        let root = Aabb::new(DVec3::ZERO, DVec3::new(2.0, 2.0, 2.0));
        let upper_x = create_child_aabb(&root, 0b100);
        assert_eq!(upper_x.min.x, 1.0);
        assert_eq!(upper_x.min.y, 0.0);
        let upper_z = create_child_aabb(&root, 0b001);
        assert_eq!(upper_z.min.z, 1.0);
        assert_eq!(upper_z.max.x, 1.0);
    }

    #[test]
    fn intersection_is_inclusive_at_faces() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let b = Aabb::new(DVec3::ONE, DVec3::splat(2.0));
        let c = Aabb::new(DVec3::splat(1.1), DVec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
