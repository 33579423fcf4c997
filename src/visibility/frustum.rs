use crate::octree::aabb::Aabb;
use glam::{DMat4, DVec3, DVec4};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersect {
    Outside,
    Intersecting,
    Inside,
}

/// Six clipping planes stored as `(normal, distance)`; a point `p` is on the
/// inner side of a plane when `normal.dot(p) + distance >= 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [DVec4; 6],
}

impl Default for Frustum {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Frustum {
    pub fn new(planes: [DVec4; 6]) -> Self {
        Self { planes }
    }

    /// A frustum that contains everything.
    pub fn unbounded() -> Self {
        Self {
            planes: [DVec4::W; 6],
        }
    }

    /// Extracts the planes of a combined view-projection matrix whose clip
    /// depth ranges over `[0, 1]`, as produced by `glam` projections.
    pub fn from_view_projection(view_projection: DMat4) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(normalize_plane);
        Self { planes }
    }

    pub fn compute_visibility(&self, bounds: &Aabb) -> Intersect {
        let center = bounds.center();
        let half_extents = bounds.half_extents();
        let mut intersecting = false;

        for plane in &self.planes {
            let normal = plane.truncate();
            let radius = half_extents.dot(normal.abs());
            let distance = normal.dot(center) + plane.w;
            if distance < -radius {
                return Intersect::Outside;
            }
            if distance < radius {
                intersecting = true;
            }
        }

        if intersecting {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }

    pub fn intersects(&self, bounds: &Aabb) -> bool {
        self.compute_visibility(bounds) != Intersect::Outside
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

fn normalize_plane(plane: DVec4) -> DVec4 {
    let length = plane.truncate().length();
    if length > 0.0 { plane / length } else { plane }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let view = DMat4::look_at_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y);
        let projection = DMat4::perspective_rh(90f64.to_radians(), 1.0, 1.0, 100.0);
        Frustum::from_view_projection(projection * view)
    }

    #[test]
    fn boxes_in_front_of_the_camera_are_visible() {
        let frustum = camera_frustum();
        let ahead = Aabb::new(DVec3::new(-1.0, -1.0, -12.0), DVec3::new(1.0, 1.0, -10.0));
        assert_eq!(frustum.compute_visibility(&ahead), Intersect::Inside);
        assert!(frustum.contains_point(DVec3::new(0.0, 0.0, -50.0)));

        let straddling = Aabb::new(DVec3::new(-1.0, -1.0, -101.0), DVec3::new(1.0, 1.0, -99.0));
        assert_eq!(frustum.compute_visibility(&straddling), Intersect::Intersecting);
    }

    #[test]
    fn boxes_behind_or_beside_are_culled() {
        let frustum = camera_frustum();
        let behind = Aabb::new(DVec3::new(-1.0, -1.0, 5.0), DVec3::new(1.0, 1.0, 6.0));
        assert!(!frustum.intersects(&behind));

        let beside = Aabb::new(DVec3::new(30.0, -1.0, -12.0), DVec3::new(32.0, 1.0, -10.0));
        assert!(!frustum.intersects(&beside));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, -0.5)));
    }

    #[test]
    fn unbounded_frustum_keeps_everything() {
        let far = Aabb::new(DVec3::splat(1e12), DVec3::splat(1e12 + 1.0));
        assert_eq!(Frustum::unbounded().compute_visibility(&far), Intersect::Inside);
    }
}
