pub use crate::config::{SelectionConfig, StreamingConfig};
pub use crate::metadata::{Metadata, RecordLayout};
pub use crate::octree::aabb::Aabb;
pub use crate::octree::address::{OctantAddress, Orientation};
pub use crate::octree::{NodeDescriptor, Octree};
pub use crate::point::codec::{decode, decode_points, encode, encode_points, AttributeValue, PointAccessor};
pub use crate::point::reader::{BufferPointReader, PointReader, ReadStatus};
pub use crate::point::schema::{Attribute, PointAttributeSchema, PointKind, ScalarType, VectorType};
pub use crate::point::types::*;
pub use crate::point::PointData;
pub use crate::point_cloud::PotreePointCloud;
pub use crate::resource::memory::MemoryClient;
pub use crate::resource::ResourceClient;
pub use crate::streaming::gpu::GpuLayer;
pub use crate::streaming::invalidate::InvalidateCacheToken;
pub use crate::streaming::source::{NodeSource, ResourceNodeSource};
pub use crate::streaming::StreamingLoader;
pub use crate::visibility::frustum::Frustum;
pub use crate::visibility::{select_visible_nodes, Camera, Selection, VisibleNode};
pub use crate::writer::{DatasetHeader, DirectoryPointWriter, PointWriter};

#[cfg(feature = "fs")]
pub use crate::resource::file::FileClient;

// Error types
pub use crate::config::ConfigError;
pub use crate::hierarchy::ReadHierarchyError;
pub use crate::metadata::ReadMetadataError;
pub use crate::octree::address::AddressError;
pub use crate::octree::OctreeError;
pub use crate::point::codec::CodecError;
pub use crate::point::schema::SchemaError;
pub use crate::point_cloud::LoadPotreePointCloudError;
pub use crate::resource::ResourceError;
pub use crate::streaming::source::LoadError;
pub use crate::writer::WritePointsError;
