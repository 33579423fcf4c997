use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("No point kind matches the attribute combination [{0}]")]
    UnrecognizedPointKind(String),

    #[error("Point kind {kind} does not support {attribute} as declared by the schema")]
    UnsupportedAttributeAccess { kind: String, attribute: Attribute },

    #[error("Invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },
}

/// The eight attribute slots a point may carry, in encoding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    Position,
    Intensity,
    Normal,
    Color,
    Label,
    Curvature,
    HitCount,
    GpsTime,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::Position,
        Attribute::Intensity,
        Attribute::Normal,
        Attribute::Color,
        Attribute::Label,
        Attribute::Curvature,
        Attribute::HitCount,
        Attribute::GpsTime,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Attribute::Position => "position",
            Attribute::Intensity => "intensity",
            Attribute::Normal => "normal",
            Attribute::Color => "color",
            Attribute::Label => "label",
            Attribute::Curvature => "curvature",
            Attribute::HitCount => "hit count",
            Attribute::GpsTime => "gps time",
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ScalarType {
    pub const fn size(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 => 8,
        }
    }
}

/// Three component float vectors, the only shape position and normal accept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VectorType {
    Vec3F32,
    #[default]
    Vec3F64,
}

impl VectorType {
    pub const fn size(self) -> usize {
        match self {
            VectorType::Vec3F32 => 12,
            VectorType::Vec3F64 => 24,
        }
    }
}

/// Storage representation of one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Scalar(ScalarType),
    Vector(VectorType),
}

impl AttributeType {
    pub const fn size(self) -> usize {
        match self {
            AttributeType::Scalar(scalar) => scalar.size(),
            AttributeType::Vector(vector) => vector.size(),
        }
    }
}

impl From<ScalarType> for AttributeType {
    fn from(value: ScalarType) -> Self {
        AttributeType::Scalar(value)
    }
}

impl From<VectorType> for AttributeType {
    fn from(value: VectorType) -> Self {
        AttributeType::Vector(value)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Scalar(scalar) => write!(f, "{scalar:?}"),
            AttributeType::Vector(vector) => write!(f, "{vector:?}"),
        }
    }
}

/// Byte offset of every declared attribute inside an encoded point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeLayout {
    offsets: [Option<usize>; 8],
    point_size: usize,
}

impl AttributeLayout {
    pub fn offset(&self, attribute: Attribute) -> Option<usize> {
        self.offsets[attribute.slot()]
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }
}

/// Declares which attributes a point carries and how each one is stored.
///
/// Position is always present. The point kind and the byte layout are derived
/// on first use and cached; the builder methods reset both caches.
#[derive(Clone, Default)]
pub struct PointAttributeSchema {
    position: VectorType,
    intensity: Option<ScalarType>,
    normal: Option<VectorType>,
    color: Option<AttributeType>,
    label: Option<ScalarType>,
    curvature: Option<ScalarType>,
    hit_count: Option<ScalarType>,
    gps_time: Option<ScalarType>,
    kind: OnceLock<PointKind>,
    layout: OnceLock<AttributeLayout>,
}

impl PointAttributeSchema {
    pub fn new(position: VectorType) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_intensity(mut self, representation: ScalarType) -> Self {
        self.intensity = Some(representation);
        self.reset_caches()
    }

    pub fn with_normal(mut self, representation: VectorType) -> Self {
        self.normal = Some(representation);
        self.reset_caches()
    }

    pub fn with_color(mut self, representation: impl Into<AttributeType>) -> Self {
        self.color = Some(representation.into());
        self.reset_caches()
    }

    pub fn with_label(mut self, representation: ScalarType) -> Self {
        self.label = Some(representation);
        self.reset_caches()
    }

    pub fn with_curvature(mut self, representation: ScalarType) -> Self {
        self.curvature = Some(representation);
        self.reset_caches()
    }

    pub fn with_hit_count(mut self, representation: ScalarType) -> Self {
        self.hit_count = Some(representation);
        self.reset_caches()
    }

    pub fn with_gps_time(mut self, representation: ScalarType) -> Self {
        self.gps_time = Some(representation);
        self.reset_caches()
    }

    fn reset_caches(mut self) -> Self {
        self.kind = OnceLock::new();
        self.layout = OnceLock::new();
        self
    }

    pub fn position(&self) -> VectorType {
        self.position
    }

    /// Representation declared for `attribute`, `None` when absent.
    pub fn attribute_type(&self, attribute: Attribute) -> Option<AttributeType> {
        match attribute {
            Attribute::Position => Some(self.position.into()),
            Attribute::Intensity => self.intensity.map(Into::into),
            Attribute::Normal => self.normal.map(Into::into),
            Attribute::Color => self.color,
            Attribute::Label => self.label.map(Into::into),
            Attribute::Curvature => self.curvature.map(Into::into),
            Attribute::HitCount => self.hit_count.map(Into::into),
            Attribute::GpsTime => self.gps_time.map(Into::into),
        }
    }

    pub fn has(&self, attribute: Attribute) -> bool {
        self.attribute_type(attribute).is_some()
    }

    /// Declared attributes with their representation, in encoding order.
    pub fn attributes(&self) -> impl Iterator<Item = (Attribute, AttributeType)> + '_ {
        Attribute::ALL
            .into_iter()
            .filter_map(|attribute| self.attribute_type(attribute).map(|ty| (attribute, ty)))
    }

    pub fn layout(&self) -> &AttributeLayout {
        self.layout.get_or_init(|| {
            let mut offsets = [None; 8];
            let mut point_size = 0;
            for (attribute, ty) in self.attributes() {
                offsets[attribute.slot()] = Some(point_size);
                point_size += ty.size();
            }
            AttributeLayout { offsets, point_size }
        })
    }

    pub fn offset(&self, attribute: Attribute) -> Option<usize> {
        self.layout().offset(attribute)
    }

    /// Size in bytes of one encoded point.
    pub fn point_size(&self) -> usize {
        self.layout().point_size()
    }

    /// Resolves the canonical kind of this attribute combination.
    pub fn point_kind(&self) -> Result<PointKind, SchemaError> {
        if let Some(kind) = self.kind.get() {
            return Ok(*kind);
        }
        let kind = self.resolve_kind()?;
        Ok(*self.kind.get_or_init(|| kind))
    }

    fn resolve_kind(&self) -> Result<PointKind, SchemaError> {
        use AttributeType::Vector;
        use ScalarType::{UInt16, UInt8};
        use VectorType::{Vec3F32, Vec3F64};

        let kind = match (
            self.position,
            self.intensity,
            self.normal,
            self.color,
            self.label,
            self.curvature,
            self.hit_count,
            self.gps_time,
        ) {
            (Vec3F64, None, None, None, None, None, None, None) => PointKind::PosD3,
            (Vec3F64, Some(UInt16), None, Some(Vector(Vec3F32)), None, None, None, None) => {
                PointKind::PosD3ColF3InUs
            }
            (Vec3F64, Some(UInt16), None, None, None, None, None, None) => PointKind::PosD3InUs,
            (Vec3F64, None, None, Some(Vector(Vec3F32)), None, None, None, None) => {
                PointKind::PosD3ColF3
            }
            (Vec3F64, None, None, None, Some(UInt8), None, None, None) => PointKind::PosD3LblB,
            (Vec3F64, Some(UInt16), Some(Vec3F32), Some(Vector(Vec3F32)), None, None, None, None) => {
                PointKind::PosD3NorF3ColF3InUs
            }
            (Vec3F64, Some(UInt16), Some(Vec3F32), None, None, None, None, None) => {
                PointKind::PosD3NorF3InUs
            }
            (Vec3F64, None, Some(Vec3F32), Some(Vector(Vec3F32)), None, None, None, None) => {
                PointKind::PosD3NorF3ColF3
            }
            (Vec3F64, None, None, Some(Vector(Vec3F32)), Some(UInt8), None, None, None) => {
                PointKind::PosD3ColF3LblB
            }
            _ => return Err(SchemaError::UnrecognizedPointKind(self.to_string())),
        };
        Ok(kind)
    }
}

impl PartialEq for PointAttributeSchema {
    fn eq(&self, other: &Self) -> bool {
        Attribute::ALL
            .into_iter()
            .all(|attribute| self.attribute_type(attribute) == other.attribute_type(attribute))
    }
}

impl Eq for PointAttributeSchema {}

impl Hash for PointAttributeSchema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for attribute in Attribute::ALL {
            self.attribute_type(attribute).hash(state);
        }
    }
}

impl fmt::Display for PointAttributeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (attribute, ty)) in self.attributes().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attribute}: {ty}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PointAttributeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PointAttributeSchema [{self}]")
    }
}

/// Named attribute combinations with a dedicated point type.
///
/// Every kind stores position as three f64. `ColF3` and `NorF3` are three f32,
/// `InUs` a u16 intensity and `LblB` a u8 label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointKind {
    PosD3,
    PosD3ColF3InUs,
    PosD3InUs,
    PosD3ColF3,
    PosD3LblB,
    PosD3NorF3ColF3InUs,
    PosD3NorF3InUs,
    PosD3NorF3ColF3,
    PosD3ColF3LblB,
}

impl PointKind {
    pub const ALL: [PointKind; 9] = [
        PointKind::PosD3,
        PointKind::PosD3ColF3InUs,
        PointKind::PosD3InUs,
        PointKind::PosD3ColF3,
        PointKind::PosD3LblB,
        PointKind::PosD3NorF3ColF3InUs,
        PointKind::PosD3NorF3InUs,
        PointKind::PosD3NorF3ColF3,
        PointKind::PosD3ColF3LblB,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PointKind::PosD3 => "PosD3",
            PointKind::PosD3ColF3InUs => "PosD3ColF3InUs",
            PointKind::PosD3InUs => "PosD3InUs",
            PointKind::PosD3ColF3 => "PosD3ColF3",
            PointKind::PosD3LblB => "PosD3LblB",
            PointKind::PosD3NorF3ColF3InUs => "PosD3NorF3ColF3InUs",
            PointKind::PosD3NorF3InUs => "PosD3NorF3InUs",
            PointKind::PosD3NorF3ColF3 => "PosD3NorF3ColF3",
            PointKind::PosD3ColF3LblB => "PosD3ColF3LblB",
        }
    }

    /// The schema this kind resolves from.
    pub fn schema(self) -> PointAttributeSchema {
        let schema = PointAttributeSchema::new(VectorType::Vec3F64);
        match self {
            PointKind::PosD3 => schema,
            PointKind::PosD3ColF3InUs => schema
                .with_intensity(ScalarType::UInt16)
                .with_color(VectorType::Vec3F32),
            PointKind::PosD3InUs => schema.with_intensity(ScalarType::UInt16),
            PointKind::PosD3ColF3 => schema.with_color(VectorType::Vec3F32),
            PointKind::PosD3LblB => schema.with_label(ScalarType::UInt8),
            PointKind::PosD3NorF3ColF3InUs => schema
                .with_intensity(ScalarType::UInt16)
                .with_normal(VectorType::Vec3F32)
                .with_color(VectorType::Vec3F32),
            PointKind::PosD3NorF3InUs => schema
                .with_intensity(ScalarType::UInt16)
                .with_normal(VectorType::Vec3F32),
            PointKind::PosD3NorF3ColF3 => schema
                .with_normal(VectorType::Vec3F32)
                .with_color(VectorType::Vec3F32),
            PointKind::PosD3ColF3LblB => schema
                .with_color(VectorType::Vec3F32)
                .with_label(ScalarType::UInt8),
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
