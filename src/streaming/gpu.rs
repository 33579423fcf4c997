use crate::octree::address::OctantAddress;

/// Render side consumer of decoded nodes.
///
/// Only the thread driving [`StreamingLoader::update`](super::StreamingLoader::update)
/// calls into the layer. Handles are opaque to the loader.
pub trait GpuLayer<P> {
    type Handle;

    fn create_mesh(&mut self, address: OctantAddress, points: &[P]) -> Self::Handle;

    /// Rebuilds the mesh of a node whose cached render data was invalidated.
    fn update_mesh(&mut self, address: OctantAddress, handle: &mut Self::Handle, points: &[P]);

    /// Releases a mesh. Called exactly once per handle.
    fn dispose_mesh(&mut self, address: OctantAddress, handle: Self::Handle);
}
