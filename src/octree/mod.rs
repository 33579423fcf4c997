pub mod aabb;
pub mod address;
pub mod node;

use crate::octree::aabb::Aabb;
use crate::octree::address::{AddressError, OctantAddress};
use crate::octree::node::Octant;
use slab::Slab;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OctreeError {
    #[error("Node {0} is described more than once")]
    DuplicateNode(OctantAddress),

    #[error("Node {0} has no parent in the hierarchy")]
    MissingParent(OctantAddress),

    #[error("Node {0} does not exist")]
    NodeNotFound(OctantAddress),

    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
}

/// One entry of a hierarchy description, as produced by a hierarchy reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub address: OctantAddress,
    pub num_points: u64,
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl NodeDescriptor {
    pub fn new(address: OctantAddress, num_points: u64) -> Self {
        Self {
            address,
            num_points,
            byte_offset: 0,
            byte_size: 0,
        }
    }

    pub fn with_byte_range(mut self, byte_offset: u64, byte_size: u64) -> Self {
        self.byte_offset = byte_offset;
        self.byte_size = byte_size;
        self
    }
}

/// Spatial index of a point cloud. Nodes live in a slab and are looked up by
/// their [`OctantAddress`]; the structure does not change once built.
#[derive(Clone, Debug)]
pub struct Octree {
    storage: Slab<Octant>,
    root_id: NodeId,
    index: HashMap<OctantAddress, NodeId>,
    max_depth: i32,
}

impl Octree {
    /// Builds the tree from a hierarchy description. Descriptors may come in
    /// any order; every non-root node needs its parent to be described too.
    /// A missing root descriptor yields an empty root.
    pub fn from_descriptors(
        bounding_box: Aabb,
        spacing: f64,
        descriptors: impl IntoIterator<Item = NodeDescriptor>,
    ) -> Result<Self, OctreeError> {
        let mut descriptors: Vec<NodeDescriptor> = descriptors.into_iter().collect();
        descriptors.sort_by_key(|descriptor| (descriptor.address.depth(), descriptor.address));

        let mut storage = Slab::with_capacity(descriptors.len().max(1));
        let root_id = NodeId(storage.insert(Octant::new(OctantAddress::ROOT, bounding_box, spacing)));
        let mut octree = Self {
            storage,
            root_id,
            index: HashMap::from([(OctantAddress::ROOT, root_id)]),
            max_depth: 0,
        };

        let mut root_seen = false;
        for descriptor in descriptors {
            if !descriptor.address.is_valid() {
                return Err(AddressError::InvalidDepth(descriptor.address.depth()).into());
            }
            if descriptor.address == OctantAddress::ROOT {
                if root_seen {
                    return Err(OctreeError::DuplicateNode(descriptor.address));
                }
                root_seen = true;
                let root = octree.root_mut();
                root.num_points = descriptor.num_points;
                root.byte_offset = descriptor.byte_offset;
                root.byte_size = descriptor.byte_size;
                continue;
            }
            octree.insert(descriptor)?;
        }

        Ok(octree)
    }

    fn insert(&mut self, descriptor: NodeDescriptor) -> Result<NodeId, OctreeError> {
        let address = descriptor.address;
        if self.index.contains_key(&address) {
            return Err(OctreeError::DuplicateNode(address));
        }
        let (parent_address, orientation) = address
            .parent()
            .zip(address.last_orientation())
            .ok_or(OctreeError::MissingParent(address))?;
        let parent_id = *self
            .index
            .get(&parent_address)
            .ok_or(OctreeError::MissingParent(address))?;

        let parent = &self.storage[parent_id.0];
        let mut octant = Octant::new(
            address,
            parent.bounding_box.child(orientation),
            parent.spacing / 2.0,
        )
        .with_points(descriptor.num_points)
        .with_byte_range(descriptor.byte_offset, descriptor.byte_size);
        octant.parent = Some(parent_id);

        let id = NodeId(self.storage.insert(octant));
        self.storage[parent_id.0].children[orientation.index()] = Some(id);
        self.index.insert(address, id);
        self.max_depth = self.max_depth.max(address.depth());
        Ok(id)
    }

    pub fn root(&self) -> &Octant {
        &self.storage[self.root_id.0]
    }

    fn root_mut(&mut self) -> &mut Octant {
        &mut self.storage[self.root_id.0]
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Octant> {
        self.storage.get(node_id.0)
    }

    pub fn get(&self, address: OctantAddress) -> Option<&Octant> {
        self.index.get(&address).and_then(|id| self.node(*id))
    }

    pub fn contains(&self, address: OctantAddress) -> bool {
        self.index.contains_key(&address)
    }

    /// Deepest level present in the tree.
    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn total_points(&self) -> u64 {
        self.iter().map(|octant| octant.num_points).sum()
    }

    /// Refines the point count of a node, the only mutation allowed after build.
    pub fn set_num_points(&mut self, address: OctantAddress, num_points: u64) -> Result<(), OctreeError> {
        let id = *self.index.get(&address).ok_or(OctreeError::NodeNotFound(address))?;
        self.storage[id.0].num_points = num_points;
        Ok(())
    }

    /// Depth-first walk starting at the root.
    pub fn iter(&self) -> OctreeIter<'_> {
        OctreeIter {
            octree: self,
            stack: vec![self.root_id],
        }
    }
}

pub struct OctreeIter<'a> {
    octree: &'a Octree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for OctreeIter<'a> {
    type Item = &'a Octant;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.octree.node(id)?;
        self.stack.extend(node.children.iter().rev().flatten().copied());
        Some(node)
    }
}
