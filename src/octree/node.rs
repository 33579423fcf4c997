use crate::octree::aabb::Aabb;
use crate::octree::address::{OctantAddress, Orientation};
use crate::octree::NodeId;

/// One node of the spatial index. Holds no point data, only what is needed to
/// decide its visibility and to fetch its payload.
#[derive(Clone, Debug, Default)]
pub struct Octant {
    pub address: OctantAddress,
    pub bounding_box: Aabb,
    pub spacing: f64,
    pub num_points: u64,
    /// Location of the encoded points inside the backing octree file.
    pub byte_offset: u64,
    pub byte_size: u64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 8],
}

impl Octant {
    pub fn new(address: OctantAddress, bounding_box: Aabb, spacing: f64) -> Self {
        Self {
            address,
            bounding_box,
            spacing,
            ..Default::default()
        }
    }

    pub fn with_points(mut self, num_points: u64) -> Self {
        self.num_points = num_points;
        self
    }

    pub fn with_byte_range(mut self, byte_offset: u64, byte_size: u64) -> Self {
        self.byte_offset = byte_offset;
        self.byte_size = byte_size;
        self
    }

    pub fn level(&self) -> i32 {
        self.address.depth()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn child(&self, orientation: Orientation) -> Option<NodeId> {
        self.children[orientation.index()]
    }

    /// Children present in this octant, in orientation order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }
}
