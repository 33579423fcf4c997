//! Potree 2 `hierarchy.bin` parsing.
//!
//! The file is a sequence of chunks of 22 byte entries listed breadth first.
//! The first entry of a chunk describes the chunk's own root; entries of type
//! [`NODE_TYPE_PROXY`] point to the chunk holding that subtree.

use crate::octree::address::{AddressError, OctantAddress, Orientation};
use crate::octree::NodeDescriptor;
use crate::resource::{ResourceClient, ResourceError};
use binrw::{binrw, BinReaderExt, BinWriterExt};
use std::collections::VecDeque;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, instrument};

pub const BYTES_PER_NODE: usize = 22;
pub const NODE_TYPE_NORMAL: u8 = 0;
pub const NODE_TYPE_LEAF: u8 = 1;
pub const NODE_TYPE_PROXY: u8 = 2;

#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct HierarchyNodeEntry {
    pub r#type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
}

#[derive(Error, Debug)]
pub enum ReadHierarchyError {
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Invalid binary data")]
    InvalidBinaryData(#[from] binrw::error::Error),

    #[error("Invalid node address: {0}")]
    Address(#[from] AddressError),

    #[error("Hierarchy chunk of {0} bytes is not a whole number of entries")]
    MalformedChunk(usize),
}

/// Reference to a chunk that still has to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyEntry {
    pub address: OctantAddress,
    pub byte_offset: u64,
    pub byte_size: u64,
}

#[derive(Debug, Default)]
pub struct HierarchyChunk {
    pub nodes: Vec<NodeDescriptor>,
    pub proxies: Vec<ProxyEntry>,
}

/// Parses the chunk rooted at `root`.
pub fn parse_hierarchy_chunk(root: OctantAddress, buf: &[u8]) -> Result<HierarchyChunk, ReadHierarchyError> {
    if buf.len() % BYTES_PER_NODE != 0 {
        return Err(ReadHierarchyError::MalformedChunk(buf.len()));
    }
    let num_nodes = buf.len() / BYTES_PER_NODE;
    let mut cursor = Cursor::new(buf);
    let mut chunk = HierarchyChunk::default();
    let mut pending = VecDeque::from([root]);

    for i in 0..num_nodes {
        let header: HierarchyNodeEntry = cursor.read_le()?;
        let Some(address) = pending.pop_front() else {
            // more entries than announced children
            return Err(ReadHierarchyError::MalformedChunk(buf.len()));
        };

        if i > 0 && header.r#type == NODE_TYPE_PROXY {
            chunk.proxies.push(ProxyEntry {
                address,
                byte_offset: header.byte_offset,
                byte_size: header.byte_size,
            });
            continue;
        }

        // workaround for issue https://github.com/potree/potree/issues/1125
        // some inner nodes erroneously report >0 points even though have 0 points
        let num_points = if header.byte_size == 0 { 0 } else { header.num_points as u64 };
        chunk.nodes.push(
            NodeDescriptor::new(address, num_points).with_byte_range(header.byte_offset, header.byte_size),
        );

        for child_index in 0..8u8 {
            if header.child_mask & (1 << child_index) == 0 {
                continue;
            }
            let orientation = Orientation::from_potree_index(child_index).unwrap_or(Orientation::LEFT_FRONT_DOWN);
            pending.push_back(address.child(orientation)?);
        }
    }

    Ok(chunk)
}

/// Reads every chunk of the hierarchy, following proxies.
#[instrument(skip(client))]
pub async fn read_hierarchy<C: ResourceClient>(
    client: &C,
    url: &str,
    first_chunk_size: u64,
) -> Result<Vec<NodeDescriptor>, ReadHierarchyError> {
    let mut nodes = Vec::new();
    let mut chunks = VecDeque::from([ProxyEntry {
        address: OctantAddress::ROOT,
        byte_offset: 0,
        byte_size: first_chunk_size,
    }]);

    while let Some(proxy) = chunks.pop_front() {
        let data = client
            .get_range(url, proxy.byte_offset, proxy.byte_size as usize, None)
            .await?;
        let chunk = parse_hierarchy_chunk(proxy.address, &data)?;
        debug!(
            root = %proxy.address,
            nodes = chunk.nodes.len(),
            proxies = chunk.proxies.len(),
            "parsed hierarchy chunk"
        );
        nodes.extend(chunk.nodes);
        chunks.extend(chunk.proxies);
    }

    Ok(nodes)
}

/// Encodes entries the way [`parse_hierarchy_chunk`] reads them.
pub fn write_hierarchy_chunk(entries: &[HierarchyNodeEntry]) -> Result<Vec<u8>, binrw::Error> {
    let mut cursor = Cursor::new(Vec::with_capacity(entries.len() * BYTES_PER_NODE));
    for entry in entries {
        cursor.write_le(entry)?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::memory::MemoryClient;

    fn entry(r#type: u8, child_mask: u8, num_points: u32, byte_offset: u64, byte_size: u64) -> HierarchyNodeEntry {
        HierarchyNodeEntry {
            r#type,
            child_mask,
            num_points,
            byte_offset,
            byte_size,
        }
    }

    fn names(nodes: &[NodeDescriptor]) -> Vec<String> {
        nodes.iter().map(|node| node.address.to_path_string()).collect()
    }

    #[test]
    fn entries_are_22_bytes() {
        let bytes = write_hierarchy_chunk(&[entry(NODE_TYPE_LEAF, 0, 7, 1, 2)]).unwrap();
        assert_eq!(bytes.len(), BYTES_PER_NODE);
        assert_eq!(bytes[0], NODE_TYPE_LEAF);
        assert_eq!(bytes[2], 7);
    }

    #[test]
    fn children_follow_potree_numbering() {
        // root has children 1 and 4; child 4 has child 2
        let bytes = write_hierarchy_chunk(&[
            entry(NODE_TYPE_NORMAL, 0b0001_0010, 100, 0, 10),
            entry(NODE_TYPE_LEAF, 0, 20, 10, 5),
            entry(NODE_TYPE_NORMAL, 0b0000_0100, 30, 15, 5),
            entry(NODE_TYPE_LEAF, 0, 0, 20, 0),
        ])
        .unwrap();

        let chunk = parse_hierarchy_chunk(OctantAddress::ROOT, &bytes).unwrap();
        assert_eq!(names(&chunk.nodes), ["r", "r1", "r4", "r42"]);
        assert_eq!(
            chunk.nodes[1].address.last_orientation(),
            Some(Orientation::LEFT_FRONT_UP)
        );
        assert_eq!(chunk.nodes[2].byte_offset, 15);
        assert!(chunk.proxies.is_empty());
    }

    #[test]
    fn zero_sized_nodes_report_no_points() {
        let bytes = write_hierarchy_chunk(&[entry(NODE_TYPE_LEAF, 0, 99, 0, 0)]).unwrap();
        let chunk = parse_hierarchy_chunk(OctantAddress::ROOT, &bytes).unwrap();
        assert_eq!(chunk.nodes[0].num_points, 0);
    }

    #[test]
    fn malformed_chunks_are_rejected() {
        assert!(matches!(
            parse_hierarchy_chunk(OctantAddress::ROOT, &[0; 23]),
            Err(ReadHierarchyError::MalformedChunk(23))
        ));
        let bytes = write_hierarchy_chunk(&[entry(NODE_TYPE_LEAF, 0, 1, 0, 1), entry(NODE_TYPE_LEAF, 0, 1, 0, 1)]).unwrap();
        assert!(parse_hierarchy_chunk(OctantAddress::ROOT, &bytes).is_err());
    }

    #[tokio::test]
    async fn proxies_are_followed() {
        let first = write_hierarchy_chunk(&[
            entry(NODE_TYPE_NORMAL, 0b1000_0000, 10, 0, 100),
            entry(NODE_TYPE_PROXY, 0, 5, 44, 44),
        ])
        .unwrap();
        let second = write_hierarchy_chunk(&[
            entry(NODE_TYPE_NORMAL, 0b0000_0001, 5, 100, 50),
            entry(NODE_TYPE_LEAF, 0, 3, 150, 30),
        ])
        .unwrap();
        let client = MemoryClient::new();
        client.insert("mem://hierarchy.bin", [first, second].concat());

        let nodes = read_hierarchy(&client, "mem://hierarchy.bin", 44).await.unwrap();
        assert_eq!(names(&nodes), ["r", "r7", "r70"]);
        assert_eq!(nodes[1].num_points, 5);
        assert_eq!(nodes[1].byte_offset, 100);
        assert_eq!(nodes[2].byte_size, 30);
    }
}
