use crate::octree::aabb::Aabb;
use crate::point::codec::{encode_into, AttributeValue, CodecError, PointAccessor};
use crate::point::schema::{
    Attribute, AttributeType as SchemaType, PointAttributeSchema, ScalarType, SchemaError,
    VectorType,
};
use crate::point::PointData;
use crate::resource::{ResourceClient, ResourceError};
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, IVec3, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub async fn read_metadata<C: ResourceClient>(client: &C, url: &str) -> Result<Metadata, ReadMetadataError> {
    Ok(client.get_json(url, None).await?)
}

#[derive(Error, Debug)]
pub enum ReadMetadataError {
    #[error("Invalid json")]
    JsonError(#[from] serde_json::error::Error),

    #[error("Resource error: {0}")]
    ResourceError(#[from] ResourceError),
}

/// Content of a Potree 2 `metadata.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points: u64,
    #[serde(default)]
    pub projection: String,
    pub hierarchy: HierarchyMetadata,
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub spacing: f64,
    pub bounding_box: BoundingBox,
    pub encoding: String,
    pub attributes: Vec<AttributeMetadata>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyMetadata {
    pub first_chunk_size: u64,
    pub step_size: u16,
    pub depth: u16,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "undefined")]
    Undefined,
}

impl AttributeType {
    fn scalar(self) -> Option<ScalarType> {
        Some(match self {
            AttributeType::Int8 => ScalarType::Int8,
            AttributeType::Int16 => ScalarType::Int16,
            AttributeType::Int32 => ScalarType::Int32,
            AttributeType::Int64 => ScalarType::Int64,
            AttributeType::UInt8 => ScalarType::UInt8,
            AttributeType::UInt16 => ScalarType::UInt16,
            AttributeType::UInt32 => ScalarType::UInt32,
            AttributeType::UInt64 => ScalarType::UInt64,
            AttributeType::Float => ScalarType::Float32,
            AttributeType::Double => ScalarType::Float64,
            AttributeType::Undefined => return None,
        })
    }

    fn from_scalar(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Int8 => AttributeType::Int8,
            ScalarType::Int16 => AttributeType::Int16,
            ScalarType::Int32 => AttributeType::Int32,
            ScalarType::Int64 => AttributeType::Int64,
            ScalarType::UInt8 => AttributeType::UInt8,
            ScalarType::UInt16 => AttributeType::UInt16,
            ScalarType::UInt32 => AttributeType::UInt32,
            ScalarType::UInt64 => AttributeType::UInt64,
            ScalarType::Float32 => AttributeType::Float,
            ScalarType::Float64 => AttributeType::Double,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub size: u16,
    pub num_elements: u16,
    pub element_size: u16,
    pub r#type: AttributeType,
    #[serde(default)]
    pub min: Vec<f64>,
    #[serde(default)]
    pub max: Vec<f64>,
}

impl AttributeMetadata {
    /// Describes `attribute` stored as `ty`, under the name Potree uses for it.
    pub fn describe(attribute: Attribute, ty: SchemaType) -> Self {
        let (r#type, num_elements) = match ty {
            SchemaType::Scalar(scalar) => (AttributeType::from_scalar(scalar), 1),
            SchemaType::Vector(VectorType::Vec3F32) => (AttributeType::Float, 3),
            SchemaType::Vector(VectorType::Vec3F64) => (AttributeType::Double, 3),
        };
        let size = ty.size() as u16;
        Self {
            name: potree_name(attribute).to_string(),
            description: String::new(),
            size,
            num_elements,
            element_size: size / num_elements,
            r#type,
            min: Vec::new(),
            max: Vec::new(),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidAttribute {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn encoding(&self, metadata: &Metadata) -> Result<FieldEncoding, SchemaError> {
        let attribute = attribute_for_name(&self.name);
        match (attribute, self.num_elements, self.r#type) {
            (Some(Attribute::Position), 3, AttributeType::Int32) => Ok(FieldEncoding::QuantizedPosition {
                scale: DVec3::from_array(metadata.scale),
                offset: DVec3::from_array(metadata.offset),
            }),
            (Some(Attribute::Color), n @ (3 | 4), AttributeType::UInt16) => {
                Ok(FieldEncoding::Rgb16 { channels: n as usize })
            }
            (_, 1, ty) => ty
                .scalar()
                .map(|scalar| FieldEncoding::Stored(scalar.into()))
                .ok_or_else(|| self.invalid("undefined type")),
            (_, 3, AttributeType::Float) => Ok(FieldEncoding::Stored(VectorType::Vec3F32.into())),
            (_, 3, AttributeType::Double) => Ok(FieldEncoding::Stored(VectorType::Vec3F64.into())),
            (_, n, ty) => Err(self.invalid(format!("{n} elements of {ty:?} are not supported"))),
        }
    }
}

fn potree_name(attribute: Attribute) -> &'static str {
    match attribute {
        Attribute::Position => "position",
        Attribute::Intensity => "intensity",
        Attribute::Normal => "normal",
        Attribute::Color => "rgb",
        Attribute::Label => "classification",
        Attribute::Curvature => "curvature",
        Attribute::HitCount => "hit count",
        Attribute::GpsTime => "gps-time",
    }
}

fn attribute_for_name(name: &str) -> Option<Attribute> {
    match name.to_ascii_lowercase().as_str() {
        "position" | "position_cartesian" => Some(Attribute::Position),
        "intensity" => Some(Attribute::Intensity),
        "normal" | "normals" => Some(Attribute::Normal),
        "rgb" | "rgba" | "color" => Some(Attribute::Color),
        "classification" | "label" => Some(Attribute::Label),
        "curvature" => Some(Attribute::Curvature),
        "hit count" | "hit_count" => Some(Attribute::HitCount),
        "gps-time" | "gps_time" | "gps time" => Some(Attribute::GpsTime),
        _ => None,
    }
}

impl Metadata {
    pub fn bounding_box(&self) -> Aabb {
        self.bounding_box.clone().into()
    }

    /// Point schema of the decoded node payloads. See [`Metadata::record_layout`].
    pub fn schema(&self) -> Result<PointAttributeSchema, SchemaError> {
        Ok(self.record_layout()?.schema)
    }

    /// Reads the declared attributes as the record layout of `octree.bin`.
    ///
    /// Attributes are stored back to back in declaration order, each taking
    /// its declared `size`. Those without a schema attribute are skipped.
    /// Quantized `int32` positions become double positions through `scale` and
    /// `offset`, and `uint16` rgb becomes float color.
    pub fn record_layout(&self) -> Result<RecordLayout, SchemaError> {
        let mut fields: Vec<RecordField> = Vec::with_capacity(self.attributes.len());
        let mut record_size = 0;

        for metadata in &self.attributes {
            let offset = record_size;
            record_size += metadata.size as usize;
            let Some(attribute) = attribute_for_name(&metadata.name) else {
                debug!(attribute = %metadata.name, size = metadata.size, "skipping attribute");
                continue;
            };
            if fields.iter().any(|field| field.attribute == attribute) {
                return Err(metadata.invalid("declared twice"));
            }
            let encoding = metadata.encoding(self)?;
            if encoding.stored_size() != metadata.size as usize {
                return Err(metadata.invalid(format!(
                    "declared size {} does not match {} stored bytes",
                    metadata.size,
                    encoding.stored_size()
                )));
            }
            fields.push(RecordField {
                attribute,
                offset,
                encoding,
            });
        }

        let position = fields
            .iter()
            .find(|field| field.attribute == Attribute::Position)
            .ok_or_else(|| SchemaError::InvalidAttribute {
                name: "position".to_string(),
                reason: "missing".to_string(),
            })?;
        let mut schema = PointAttributeSchema::new(vector(Attribute::Position, position.encoding.decoded())?);
        for field in &fields {
            let ty = field.encoding.decoded();
            let attribute = field.attribute;
            schema = match attribute {
                Attribute::Position => schema,
                Attribute::Intensity => schema.with_intensity(scalar(attribute, ty)?),
                Attribute::Normal => schema.with_normal(vector(attribute, ty)?),
                Attribute::Color => schema.with_color(ty),
                Attribute::Label => schema.with_label(scalar(attribute, ty)?),
                Attribute::Curvature => schema.with_curvature(scalar(attribute, ty)?),
                Attribute::HitCount => schema.with_hit_count(scalar(attribute, ty)?),
                Attribute::GpsTime => schema.with_gps_time(scalar(attribute, ty)?),
            };
        }

        let passthrough = record_size == schema.point_size()
            && fields.iter().all(|field| {
                matches!(field.encoding, FieldEncoding::Stored(_)) && schema.offset(field.attribute) == Some(field.offset)
            });
        Ok(RecordLayout {
            schema,
            record_size,
            fields,
            passthrough,
        })
    }
}

fn vector(attribute: Attribute, ty: SchemaType) -> Result<VectorType, SchemaError> {
    match ty {
        SchemaType::Vector(vector) => Ok(vector),
        SchemaType::Scalar(_) => Err(SchemaError::InvalidAttribute {
            name: potree_name(attribute).to_string(),
            reason: "expected a three component vector".to_string(),
        }),
    }
}

fn scalar(attribute: Attribute, ty: SchemaType) -> Result<ScalarType, SchemaError> {
    match ty {
        SchemaType::Scalar(scalar) => Ok(scalar),
        SchemaType::Vector(_) => Err(SchemaError::InvalidAttribute {
            name: potree_name(attribute).to_string(),
            reason: "expected a scalar".to_string(),
        }),
    }
}

/// How one attribute is laid out inside a node record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldEncoding {
    /// Bytes already in the codec representation.
    Stored(SchemaType),
    /// Three `int32`, decoded as `value * scale + offset`.
    QuantizedPosition { scale: DVec3, offset: DVec3 },
    /// `uint16` channels, the first three of which are kept. Values above 255
    /// are 16 bit and get scaled down.
    Rgb16 { channels: usize },
}

impl FieldEncoding {
    pub fn stored_size(self) -> usize {
        match self {
            FieldEncoding::Stored(ty) => ty.size(),
            FieldEncoding::QuantizedPosition { .. } => 12,
            FieldEncoding::Rgb16 { channels } => channels * 2,
        }
    }

    /// Representation handed to the codec.
    pub fn decoded(self) -> SchemaType {
        match self {
            FieldEncoding::Stored(ty) => ty,
            FieldEncoding::QuantizedPosition { .. } => VectorType::Vec3F64.into(),
            FieldEncoding::Rgb16 { .. } => VectorType::Vec3F32.into(),
        }
    }

    fn read(self, buf: &[u8]) -> AttributeValue {
        match self {
            FieldEncoding::Stored(ty) => AttributeValue::read_le(ty, buf),
            FieldEncoding::QuantizedPosition { scale, offset } => {
                let mut xyz = [0_i32; 3];
                LittleEndian::read_i32_into(&buf[..12], &mut xyz);
                AttributeValue::Vec3F64(IVec3::from_array(xyz).as_dvec3() * scale + offset)
            }
            FieldEncoding::Rgb16 { .. } => {
                let mut rgb = [0_u16; 3];
                LittleEndian::read_u16_into(&buf[..6], &mut rgb);
                let channel = |c: u16| f32::from(if c > 255 { c / 256 } else { c });
                AttributeValue::Vec3F32(Vec3::new(channel(rgb[0]), channel(rgb[1]), channel(rgb[2])))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordField {
    pub attribute: Attribute,
    /// Byte offset inside the record.
    pub offset: usize,
    pub encoding: FieldEncoding,
}

/// Layout of the points of a `DEFAULT` encoded node, and the rewrite into the
/// codec layout of [`RecordLayout::schema`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordLayout {
    schema: PointAttributeSchema,
    record_size: usize,
    fields: Vec<RecordField>,
    passthrough: bool,
}

impl RecordLayout {
    pub fn schema(&self) -> &PointAttributeSchema {
        &self.schema
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// True when records already are codec encoded points.
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Rewrites a node payload into codec encoded points.
    pub fn transcode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        if self.passthrough {
            return Ok(bytes);
        }
        let count = bytes.len() / self.record_size;
        if bytes.len() % self.record_size != 0 {
            return Err(CodecError::TruncatedBuffer {
                expected: (count + 1) * self.record_size,
                actual: bytes.len(),
            });
        }

        let mut out = Vec::with_capacity(count * self.schema.point_size());
        let mut point = PointData::default();
        for record in bytes.chunks_exact(self.record_size) {
            for field in &self.fields {
                point.set(field.attribute, field.encoding.read(&record[field.offset..]));
            }
            encode_into(&self.schema, &point, &mut out)?;
        }
        Ok(out)
    }
}

impl From<BoundingBox> for Aabb {
    fn from(value: BoundingBox) -> Self {
        Aabb::new(value.min.into(), value.max.into())
    }
}

impl From<Aabb> for BoundingBox {
    fn from(value: Aabb) -> Self {
        BoundingBox {
            min: value.min.to_array(),
            max: value.max.to_array(),
        }
    }
}
