use crate::octree::address::Orientation;
use glam::DVec3;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
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

    pub fn half_extents(&self) -> DVec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Bounds of the child octant lying in `orientation`.
    pub fn child(&self, orientation: Orientation) -> Aabb {
        let mut min = self.min;
        let mut max = self.max;
        let size = (max - min) * 0.5;

        if orientation.is_right() {
            min.x += size.x;
        } else {
            max.x -= size.x;
        }
        if orientation.is_back() {
            min.y += size.y;
        } else {
            max.y -= size.y;
        }
        if orientation.is_up() {
            min.z += size.z;
        } else {
            max.z -= size.z;
        }

        Aabb::new(min, max)
    }
}
