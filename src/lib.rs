//! Out-of-core streaming of Potree point clouds.
//!
//! Octree nodes are named by bit-packed [`OctantAddress`](octree::address::OctantAddress)es,
//! points are encoded through a [`PointAttributeSchema`](point::schema::PointAttributeSchema)
//! and a [`StreamingLoader`](streaming::StreamingLoader) keeps the nodes picked by
//! [`select_visible_nodes`](visibility::select_visible_nodes) resident.

pub mod config;
pub mod hierarchy;
pub mod metadata;
pub mod octree;
pub mod point;
pub mod point_cloud;
pub mod prelude;
pub mod resource;
pub mod streaming;
pub mod visibility;
pub mod writer;
