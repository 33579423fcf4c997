use crate::metadata::RecordLayout;
use crate::octree::address::OctantAddress;
use crate::octree::Octree;
use crate::point::codec::CodecError;
use crate::resource::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Node {0} does not exist")]
    NodeNotFound(OctantAddress),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Decoding failed: {0}")]
    Codec(#[from] CodecError),
}

/// Where the encoded points of a node come from.
#[async_trait]
pub trait NodeSource: Send + Sync + 'static {
    async fn load_node(&self, address: OctantAddress) -> Result<Vec<u8>, LoadError>;
}

#[async_trait]
impl<S: NodeSource> NodeSource for Arc<S> {
    async fn load_node(&self, address: OctantAddress) -> Result<Vec<u8>, LoadError> {
        (**self).load_node(address).await
    }
}

/// Reads node payloads from a single octree file using the byte ranges
/// recorded in the hierarchy.
#[derive(Clone, Debug)]
pub struct ResourceNodeSource<C> {
    client: C,
    url: String,
    octree: Arc<Octree>,
    layout: Option<Arc<RecordLayout>>,
}

impl<C: ResourceClient> ResourceNodeSource<C> {
    pub fn new(client: C, url: impl Into<String>, octree: Arc<Octree>) -> Self {
        Self {
            client,
            url: url.into(),
            octree,
            layout: None,
        }
    }

    /// Rewrites every payload from `layout` records into codec encoded points.
    pub fn with_record_layout(mut self, layout: Arc<RecordLayout>) -> Self {
        self.layout = Some(layout);
        self
    }
}

#[async_trait]
impl<C: ResourceClient + 'static> NodeSource for ResourceNodeSource<C> {
    async fn load_node(&self, address: OctantAddress) -> Result<Vec<u8>, LoadError> {
        let node = self.octree.get(address).ok_or(LoadError::NodeNotFound(address))?;
        if node.byte_size == 0 {
            return Ok(Vec::new());
        }
        let bytes = self
            .client
            .get_range(&self.url, node.byte_offset, node.byte_size as usize, None)
            .await?;
        match &self.layout {
            Some(layout) => Ok(layout.transcode(bytes)?),
            None => Ok(bytes),
        }
    }
}
