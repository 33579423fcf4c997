use crate::hierarchy::{read_hierarchy, ReadHierarchyError};
use crate::metadata::{read_metadata, Metadata, ReadMetadataError, RecordLayout};
use crate::octree::address::OctantAddress;
use crate::octree::{Octree, OctreeError};
use crate::point::codec::PointAccessor;
use crate::point::reader::{BufferPointReader, PointReader};
use crate::point::schema::{PointAttributeSchema, SchemaError};
use crate::resource::ResourceClient;
use crate::streaming::source::{LoadError, NodeSource, ResourceNodeSource};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Encoding whose node payloads are plain codec output.
pub const DEFAULT_ENCODING: &str = "DEFAULT";

#[derive(Error, Debug)]
pub enum LoadPotreePointCloudError {
    #[error("Error loading metadatas: {0}")]
    Metadata(#[from] ReadMetadataError),

    #[error("Error loading hierarchy: {0}")]
    Hierarchy(#[from] ReadHierarchyError),

    #[error("Unsupported point attributes: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid hierarchy: {0}")]
    Octree(#[from] OctreeError),

    #[error("Encoding not implemented: {0}")]
    EncodingUnimplemented(String),
}

/// A Potree 2 dataset: its metadata, point schema and full hierarchy.
#[derive(Clone, Debug)]
pub struct PotreePointCloud<C> {
    metadata: Metadata,
    layout: Arc<RecordLayout>,
    octree: Arc<Octree>,
    octree_url: String,
    client: C,
}

impl<C: ResourceClient + Clone + 'static> PotreePointCloud<C> {
    /// Load a Potree point cloud from a URL.
    /// Metadatas, hierarchy and octree are supposed to be accessible relatively to the provided url:
    ///  - Metadata: `<url>/metadata.json`
    ///  - Hierarchy: `<url>/hierarchy.bin`
    ///  - Octree: `<url>/octree.bin`
    #[instrument(skip(client))]
    pub async fn from_url(url: &str, client: C) -> Result<Self, LoadPotreePointCloudError> {
        let metadata = read_metadata(&client, &format!("{url}/metadata.json")).await?;
        if metadata.encoding != DEFAULT_ENCODING {
            return Err(LoadPotreePointCloudError::EncodingUnimplemented(metadata.encoding));
        }
        let layout = metadata.record_layout()?;

        let descriptors = read_hierarchy(
            &client,
            &format!("{url}/hierarchy.bin"),
            metadata.hierarchy.first_chunk_size,
        )
        .await?;
        let octree = Octree::from_descriptors(metadata.bounding_box(), metadata.spacing, descriptors)?;
        info!(
            name = %metadata.name,
            points = metadata.points,
            nodes = octree.len(),
            passthrough = layout.is_passthrough(),
            depth = octree.max_depth(),
            "point cloud loaded"
        );

        Ok(Self {
            metadata,
            layout: Arc::new(layout),
            octree: Arc::new(octree),
            octree_url: format!("{url}/octree.bin"),
            client,
        })
    }

    /// Source of node payloads for a [`StreamingLoader`](crate::streaming::StreamingLoader).
    pub fn node_source(&self) -> ResourceNodeSource<C> {
        ResourceNodeSource::new(self.client.clone(), self.octree_url.clone(), self.octree.clone())
            .with_record_layout(self.layout.clone())
    }

    pub async fn load_points<P: PointAccessor + Clone + Default>(
        &self,
        address: OctantAddress,
    ) -> Result<Vec<P>, LoadError> {
        let bytes = self.node_source().load_node(address).await?;
        Ok(BufferPointReader::new(self.schema().clone(), bytes).read_all()?)
    }
}

impl<C> PotreePointCloud<C> {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Schema of the points handed out by [`PotreePointCloud::node_source`].
    pub fn schema(&self) -> &PointAttributeSchema {
        self.layout.schema()
    }

    pub fn record_layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn octree(&self) -> &Arc<Octree> {
        &self.octree
    }
}
