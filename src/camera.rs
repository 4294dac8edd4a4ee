use crate::octree::aabb::Aabb;
use glam::{DMat4, DVec3, DVec4};

/// Snapshot of the viewing camera, polled from the embedding layer.
/// The engine compares snapshots against a movement epsilon instead of
/// subscribing to event callbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    pub position: DVec3,
    pub target: DVec3,
    pub up: DVec3,
    /// Vertical field of view, radians.
    pub fov_y: f64,
    pub aspect: f64,
    pub near: f64,
    pub far: f64,
}

impl CameraState {
    pub fn looking_at(position: DVec3, target: DVec3) -> Self {
        Self {
            position,
            target,
            up: DVec3::Z,
            fov_y: 60f64.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10_000.0,
        }
    }

    /// Camera deltas below this are ignored so sub-pixel jitter does not
    /// restart traversal passes.
    pub const MOVE_EPSILON: f64 = 1e-6;

    pub fn moved_beyond_epsilon(&self, other: &CameraState) -> bool {
        self.position.distance_squared(other.position) > Self::MOVE_EPSILON * Self::MOVE_EPSILON
            || self.target.distance_squared(other.target) > Self::MOVE_EPSILON * Self::MOVE_EPSILON
            || (self.fov_y - other.fov_y).abs() > Self::MOVE_EPSILON
    }

    pub fn view_projection(&self) -> DMat4 {
        let view = DMat4::look_at_rh(self.position, self.target, self.up);
        let proj = DMat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj * view
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

/// Six view-frustum planes, normals pointing inward. A box is rejected
/// when it lies entirely on the outside of any plane.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    /// Gribb/Hartmann plane extraction from a combined view-projection
    /// matrix.
    pub fn from_view_projection(m: &DMat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        let planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ];
        Self { planes }
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // p-vertex: the box corner furthest along the plane normal
            let p = DVec3::new(
                if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if plane.truncate().dot(p) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraState {
        CameraState::looking_at(DVec3::new(0.0, -10.0, 0.0), DVec3::ZERO)
    }

    #[test]
    fn box_ahead_is_visible_box_behind_is_culled() {
        let frustum = camera().frustum();
        let ahead = Aabb::new(DVec3::new(-1.0, -1.0, -1.0), DVec3::new(1.0, 1.0, 1.0));
        let behind = Aabb::new(DVec3::new(-1.0, -30.0, -1.0), DVec3::new(1.0, -20.0, 1.0));
        assert!(frustum.intersects_aabb(&ahead));
        assert!(!frustum.intersects_aabb(&behind));
    }

    #[test]
    fn epsilon_swallows_jitter() {
        let a = camera();
        let mut b = a;
        b.position.x += 1e-9;
        assert!(!a.moved_beyond_epsilon(&b));
        b.position.x += 0.5;
        assert!(a.moved_beyond_epsilon(&b));
    }
}
