use crate::hierarchy::{write_hierarchy_chunk, HierarchyNodeEntry, BYTES_PER_NODE, NODE_TYPE_LEAF};
use crate::metadata::{AttributeMetadata, BoundingBox, HierarchyMetadata, Metadata};
use crate::point::codec::{encode_points, CodecError, PointAccessor};
use crate::point::schema::PointAttributeSchema;
use crate::point_cloud::DEFAULT_ENCODING;
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum WritePointsError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid binary data")]
    Binary(#[from] binrw::Error),

    #[error("Declared point size {declared} does not match the schema ({actual} bytes)")]
    PointSizeMismatch { declared: usize, actual: usize },

    #[error("{0} points do not fit in a single node")]
    TooManyPoints(usize),

    #[error("Write task failed: {0}")]
    Task(String),
}

/// Dataset level information stored next to the points.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetHeader {
    pub version: String,
    pub name: String,
    pub description: String,
    pub projection: String,
    /// Quantization offset and scale of integer coordinates.
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub spacing: f64,
    pub bounding_box: BoundingBox,
    /// Checked against the schema when set.
    pub point_size: Option<usize>,
    pub hierarchy: HierarchyMetadata,
}

impl Default for DatasetHeader {
    fn default() -> Self {
        Self {
            version: "2.0".to_string(),
            name: String::new(),
            description: String::new(),
            projection: String::new(),
            offset: [0.0; 3],
            scale: [0.001; 3],
            spacing: 1.0,
            bounding_box: BoundingBox {
                min: [0.0; 3],
                max: [1.0; 3],
            },
            point_size: None,
            hierarchy: HierarchyMetadata {
                first_chunk_size: BYTES_PER_NODE as u64,
                step_size: 4,
                depth: 0,
            },
        }
    }
}

pub trait PointWriter: Send + Sync + 'static {
    fn write<P: PointAccessor>(
        &self,
        destination: &Path,
        schema: &PointAttributeSchema,
        points: &[P],
        header: &DatasetHeader,
    ) -> Result<(), WritePointsError>;

    /// Runs [`PointWriter::write`] on the blocking pool of the current tokio
    /// runtime. The task starts when this is called and owns the points.
    fn write_async<P: PointAccessor + Send + 'static>(
        self: Arc<Self>,
        destination: PathBuf,
        schema: PointAttributeSchema,
        points: Vec<P>,
        header: DatasetHeader,
    ) -> impl Future<Output = Result<(), WritePointsError>> + Send
    where
        Self: Sized,
    {
        let task = tokio::task::spawn_blocking(move || self.write(&destination, &schema, &points, &header));
        async move {
            task.await
                .map_err(|error| WritePointsError::Task(error.to_string()))?
        }
    }
}

/// Writes a Potree 2 dataset holding every point in a single root node.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryPointWriter;

impl PointWriter for DirectoryPointWriter {
    #[instrument(skip_all, fields(destination = %destination.display(), points = points.len()))]
    fn write<P: PointAccessor>(
        &self,
        destination: &Path,
        schema: &PointAttributeSchema,
        points: &[P],
        header: &DatasetHeader,
    ) -> Result<(), WritePointsError> {
        if let Some(declared) = header.point_size.filter(|declared| *declared != schema.point_size()) {
            return Err(WritePointsError::PointSizeMismatch {
                declared,
                actual: schema.point_size(),
            });
        }
        let num_points = u32::try_from(points.len()).map_err(|_| WritePointsError::TooManyPoints(points.len()))?;

        let octree = encode_points(schema, points)?;
        let hierarchy = write_hierarchy_chunk(&[HierarchyNodeEntry {
            r#type: NODE_TYPE_LEAF,
            child_mask: 0,
            num_points,
            byte_offset: 0,
            byte_size: octree.len() as u64,
        }])?;

        let metadata = Metadata {
            version: header.version.clone(),
            name: header.name.clone(),
            description: header.description.clone(),
            points: points.len() as u64,
            projection: header.projection.clone(),
            hierarchy: HierarchyMetadata {
                first_chunk_size: hierarchy.len() as u64,
                step_size: header.hierarchy.step_size,
                depth: 0,
            },
            offset: header.offset,
            scale: header.scale,
            spacing: header.spacing,
            bounding_box: header.bounding_box.clone(),
            encoding: DEFAULT_ENCODING.to_string(),
            attributes: schema
                .attributes()
                .map(|(attribute, ty)| AttributeMetadata::describe(attribute, ty))
                .collect(),
        };

        fs::create_dir_all(destination)?;
        fs::write(destination.join("octree.bin"), &octree)?;
        fs::write(destination.join("hierarchy.bin"), &hierarchy)?;
        let mut file = BufWriter::new(File::create(destination.join("metadata.json"))?);
        serde_json::to_writer_pretty(&mut file, &metadata)?;
        file.flush()?;

        debug!(bytes = octree.len(), "dataset written");
        Ok(())
    }
}
