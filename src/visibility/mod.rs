pub mod frustum;

use crate::config::SelectionConfig;
use crate::octree::aabb::Aabb;
use crate::octree::address::OctantAddress;
use crate::octree::{NodeId, Octree};
use crate::visibility::frustum::Frustum;
use glam::DVec3;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{instrument, trace};

/// Distance used when the camera sits exactly on a node center.
const MIN_DISTANCE: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    pub viewport_height: f64,
    pub frustum: Frustum,
}

impl Camera {
    /// Estimated on-screen size of `bounds`, in pixels.
    pub fn projected_size(&self, bounds: &Aabb) -> f64 {
        let center = bounds.center();
        let radius = bounds.half_extents().max_element();
        let mut distance = center.distance(self.position);
        if distance == 0.0 {
            distance = MIN_DISTANCE;
        }
        let slope = (self.fov_y / 2.0).tan();
        self.viewport_height / 2.0 * radius / (slope * distance)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleNode {
    pub address: OctantAddress,
    pub projected_size: f64,
    pub num_points: u64,
}

/// Result of one selection: nodes in descending projected size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub nodes: Vec<VisibleNode>,
    pub visible_points: u64,
    pub min_projected_size: f64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, address: OctantAddress) -> bool {
        self.nodes.iter().any(|node| node.address == address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = OctantAddress> + '_ {
        self.nodes.iter().map(|node| node.address)
    }
}

struct Candidate {
    id: NodeId,
    address: OctantAddress,
    projected_size: f64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // max-heap: biggest first, lowest address on ties
    fn cmp(&self, other: &Self) -> Ordering {
        self.projected_size
            .total_cmp(&other.projected_size)
            .then_with(|| other.address.cmp(&self.address))
    }
}

/// Picks the nodes to render for `camera`.
///
/// Nodes are visited largest on screen first. A node outside the frustum or
/// smaller than the root size times the modifier is skipped along with its
/// subtree. The walk stops at the first node that would push the point count
/// over the budget.
#[instrument(level = "debug", skip_all, fields(budget = config.point_budget))]
pub fn select_visible_nodes(octree: &Octree, camera: &Camera, config: &SelectionConfig) -> Selection {
    let root = octree.root();
    let root_size = camera.projected_size(&root.bounding_box);
    let min_projected_size = root_size * config.min_projected_size_modifier;
    let mut selection = Selection {
        min_projected_size,
        ..Default::default()
    };
    if config.point_budget == 0 {
        return selection;
    }

    let mut heap = BinaryHeap::new();
    if camera.frustum.intersects(&root.bounding_box) && root_size >= min_projected_size {
        heap.push(Candidate {
            id: octree.root_id(),
            address: root.address,
            projected_size: root_size,
        });
    }

    while let Some(candidate) = heap.pop() {
        let Some(node) = octree.node(candidate.id) else {
            continue;
        };
        if selection.visible_points + node.num_points > config.point_budget {
            trace!(node = %candidate.address, "point budget reached");
            break;
        }
        selection.visible_points += node.num_points;
        selection.nodes.push(VisibleNode {
            address: candidate.address,
            projected_size: candidate.projected_size,
            num_points: node.num_points,
        });

        for child_id in node.children() {
            let Some(child) = octree.node(child_id) else {
                continue;
            };
            if !camera.frustum.intersects(&child.bounding_box) {
                trace!(node = %child.address, "outside frustum");
                continue;
            }
            let projected_size = camera.projected_size(&child.bounding_box);
            if projected_size < min_projected_size {
                trace!(node = %child.address, projected_size, "too small");
                continue;
            }
            heap.push(Candidate {
                id: child_id,
                address: child.address,
                projected_size,
            });
        }
    }

    selection.nodes.sort_by(|a, b| {
        b.projected_size
            .total_cmp(&a.projected_size)
            .then_with(|| a.address.cmp(&b.address))
    });
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::NodeDescriptor;

    fn address(name: &str) -> OctantAddress {
        OctantAddress::from_path_string(name).unwrap()
    }

    fn octree(nodes: &[(&str, u64)]) -> Octree {
        Octree::from_descriptors(
            Aabb::new(DVec3::ZERO, DVec3::splat(8.0)),
            1.0,
            nodes.iter().map(|(name, count)| NodeDescriptor::new(address(name), *count)),
        )
        .unwrap()
    }

    fn camera_at(position: DVec3) -> Camera {
        Camera {
            position,
            fov_y: 60f64.to_radians(),
            viewport_height: 1000.0,
            frustum: Frustum::unbounded(),
        }
    }

    #[test]
    fn projected_size_shrinks_with_distance() {
        let camera = camera_at(DVec3::new(4.0, 4.0, 24.0));
        let bounds = Aabb::new(DVec3::ZERO, DVec3::splat(8.0));
        let expected = 500.0 * 4.0 / ((30f64.to_radians()).tan() * 20.0);
        assert!((camera.projected_size(&bounds) - expected).abs() < 1e-9);

        let far = camera_at(DVec3::new(4.0, 4.0, 44.0));
        assert!(far.projected_size(&bounds) < camera.projected_size(&bounds));

        let inside = camera_at(DVec3::splat(4.0));
        assert!(inside.projected_size(&bounds).is_finite());
    }

    #[test]
    fn nodes_are_ordered_by_size_then_address() {
        let tree = octree(&[("r", 10), ("r0", 10), ("r7", 10), ("r00", 10)]);
        let camera = camera_at(DVec3::splat(-2.0));
        let selection = select_visible_nodes(&tree, &camera, &SelectionConfig::default());

        let names: Vec<String> = selection.addresses().map(|a| a.to_path_string()).collect();
        assert_eq!(names, ["r", "r0", "r00", "r7"]);
        assert_eq!(selection.visible_points, 40);
        for pair in selection.nodes.windows(2) {
            assert!(pair[0].projected_size >= pair[1].projected_size);
        }
    }

    #[test]
    fn budget_truncates_the_walk() {
        let tree = octree(&[("r", 60), ("r0", 30), ("r1", 30), ("r2", 5)]);
        let camera = camera_at(DVec3::new(4.0, 4.0, 40.0));
        let config = SelectionConfig {
            point_budget: 100,
            ..Default::default()
        };
        let selection = select_visible_nodes(&tree, &camera, &config);
        assert!(selection.visible_points <= 100);
        assert_eq!(selection.len(), 2);
        assert_eq!(selection.nodes[0].address, OctantAddress::ROOT);
    }

    #[test]
    fn zero_budget_selects_nothing() {
        let tree = octree(&[("r", 1), ("r0", 1)]);
        let config = SelectionConfig {
            point_budget: 0,
            ..Default::default()
        };
        let selection = select_visible_nodes(&tree, &camera_at(DVec3::splat(20.0)), &config);
        assert!(selection.is_empty());
    }

    #[test]
    fn small_nodes_and_their_subtrees_are_skipped() {
        let tree = octree(&[("r", 1), ("r0", 1), ("r00", 1), ("r000", 1)]);
        let camera = camera_at(DVec3::new(4.0, 4.0, 40.0));
        let config = SelectionConfig {
            min_projected_size_modifier: 0.6,
            ..Default::default()
        };
        let selection = select_visible_nodes(&tree, &camera, &config);
        assert_eq!(selection.len(), 1);
        assert!(selection
            .nodes
            .iter()
            .all(|node| node.projected_size >= selection.min_projected_size));
    }

    #[test]
    fn culled_root_selects_nothing() {
        let tree = octree(&[("r", 1)]);
        let mut camera = camera_at(DVec3::splat(4.0));
        camera.frustum.planes[0] = glam::DVec4::new(1.0, 0.0, 0.0, -100.0);
        assert!(select_visible_nodes(&tree, &camera, &SelectionConfig::default()).is_empty());
    }
}
