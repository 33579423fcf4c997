//! Schema driven binary codec.
//!
//! Points are written attribute after attribute in [`Attribute::ALL`] order,
//! each with the width declared by the schema, little endian and without
//! padding. Single byte attributes sit exactly at their offset.

use crate::point::schema::{
    Attribute, AttributeType, PointAttributeSchema, ScalarType, SchemaError, VectorType,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Cannot encode a missing point")]
    NullPoint,

    #[error("Buffer too short: expected {expected} bytes, got {actual}")]
    TruncatedBuffer { expected: usize, actual: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A single attribute value in one of the representations a schema can declare.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttributeValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Vec3F32(Vec3),
    Vec3F64(DVec3),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Int8(_) => ScalarType::Int8.into(),
            AttributeValue::Int16(_) => ScalarType::Int16.into(),
            AttributeValue::Int32(_) => ScalarType::Int32.into(),
            AttributeValue::Int64(_) => ScalarType::Int64.into(),
            AttributeValue::UInt8(_) => ScalarType::UInt8.into(),
            AttributeValue::UInt16(_) => ScalarType::UInt16.into(),
            AttributeValue::UInt32(_) => ScalarType::UInt32.into(),
            AttributeValue::UInt64(_) => ScalarType::UInt64.into(),
            AttributeValue::Float32(_) => ScalarType::Float32.into(),
            AttributeValue::Float64(_) => ScalarType::Float64.into(),
            AttributeValue::Vec3F32(_) => VectorType::Vec3F32.into(),
            AttributeValue::Vec3F64(_) => VectorType::Vec3F64.into(),
        }
    }

    /// Writes the value at the start of `buf`, which must hold at least
    /// `attribute_type().size()` bytes.
    pub(crate) fn write_le(&self, buf: &mut [u8]) {
        match *self {
            AttributeValue::Int8(v) => buf[0] = v as u8,
            AttributeValue::Int16(v) => LittleEndian::write_i16(buf, v),
            AttributeValue::Int32(v) => LittleEndian::write_i32(buf, v),
            AttributeValue::Int64(v) => LittleEndian::write_i64(buf, v),
            AttributeValue::UInt8(v) => buf[0] = v,
            AttributeValue::UInt16(v) => LittleEndian::write_u16(buf, v),
            AttributeValue::UInt32(v) => LittleEndian::write_u32(buf, v),
            AttributeValue::UInt64(v) => LittleEndian::write_u64(buf, v),
            AttributeValue::Float32(v) => LittleEndian::write_f32(buf, v),
            AttributeValue::Float64(v) => LittleEndian::write_f64(buf, v),
            AttributeValue::Vec3F32(v) => LittleEndian::write_f32_into(&v.to_array(), &mut buf[..12]),
            AttributeValue::Vec3F64(v) => LittleEndian::write_f64_into(&v.to_array(), &mut buf[..24]),
        }
    }

    pub(crate) fn read_le(ty: AttributeType, buf: &[u8]) -> Self {
        match ty {
            AttributeType::Scalar(scalar) => match scalar {
                ScalarType::Int8 => AttributeValue::Int8(buf[0] as i8),
                ScalarType::Int16 => AttributeValue::Int16(LittleEndian::read_i16(buf)),
                ScalarType::Int32 => AttributeValue::Int32(LittleEndian::read_i32(buf)),
                ScalarType::Int64 => AttributeValue::Int64(LittleEndian::read_i64(buf)),
                ScalarType::UInt8 => AttributeValue::UInt8(buf[0]),
                ScalarType::UInt16 => AttributeValue::UInt16(LittleEndian::read_u16(buf)),
                ScalarType::UInt32 => AttributeValue::UInt32(LittleEndian::read_u32(buf)),
                ScalarType::UInt64 => AttributeValue::UInt64(LittleEndian::read_u64(buf)),
                ScalarType::Float32 => AttributeValue::Float32(LittleEndian::read_f32(buf)),
                ScalarType::Float64 => AttributeValue::Float64(LittleEndian::read_f64(buf)),
            },
            AttributeType::Vector(VectorType::Vec3F32) => {
                let mut xyz = [0.0_f32; 3];
                LittleEndian::read_f32_into(&buf[..12], &mut xyz);
                AttributeValue::Vec3F32(Vec3::from_array(xyz))
            }
            AttributeType::Vector(VectorType::Vec3F64) => {
                let mut xyz = [0.0_f64; 3];
                LittleEndian::read_f64_into(&buf[..24], &mut xyz);
                AttributeValue::Vec3F64(DVec3::from_array(xyz))
            }
        }
    }
}

/// Per attribute access to a point value.
///
/// Implementors report the attributes they store and accept the ones they can
/// hold. A representation mismatch is reported by returning `None` / `false`;
/// the codec turns it into [`SchemaError::UnsupportedAttributeAccess`].
pub trait PointAccessor {
    fn get(&self, attribute: Attribute) -> Option<AttributeValue>;

    fn set(&mut self, attribute: Attribute, value: AttributeValue) -> bool;

    /// Name used in error messages.
    fn kind_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

fn unsupported<P: PointAccessor + ?Sized>(point: &P, attribute: Attribute) -> CodecError {
    SchemaError::UnsupportedAttributeAccess {
        kind: point.kind_name().to_string(),
        attribute,
    }
    .into()
}

/// Encodes one point into a fresh buffer of exactly `schema.point_size()` bytes.
pub fn encode<P: PointAccessor + ?Sized>(
    schema: &PointAttributeSchema,
    point: Option<&P>,
) -> Result<Vec<u8>, CodecError> {
    let point = point.ok_or(CodecError::NullPoint)?;
    let mut buf = Vec::with_capacity(schema.point_size());
    encode_into(schema, point, &mut buf)?;
    Ok(buf)
}

/// Appends the encoding of `point` to `out`. On error `out` is left unchanged.
pub fn encode_into<P: PointAccessor + ?Sized>(
    schema: &PointAttributeSchema,
    point: &P,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let layout = schema.layout();
    let start = out.len();
    out.resize(start + layout.point_size(), 0);

    for (attribute, ty) in schema.attributes() {
        let value = match point.get(attribute) {
            Some(value) if value.attribute_type() == ty => value,
            _ => {
                out.truncate(start);
                return Err(unsupported(point, attribute));
            }
        };
        // present in the layout since the schema declares it
        let offset = layout.offset(attribute).unwrap_or_default();
        value.write_le(&mut out[start + offset..]);
    }
    Ok(())
}

/// Decodes the first point of `bytes` into `point`. Attributes the schema does
/// not declare are left untouched, and `point` is only modified when every
/// declared attribute was accepted.
pub fn decode<P: PointAccessor + Clone>(
    schema: &PointAttributeSchema,
    bytes: &[u8],
    point: &mut P,
) -> Result<(), CodecError> {
    let mut staged = point.clone();
    decode_unstaged(schema, bytes, &mut staged)?;
    *point = staged;
    Ok(())
}

/// Writes the attributes straight into `point`, which may be left partially
/// updated on error. Only used on values discarded when decoding fails.
fn decode_unstaged<P: PointAccessor + ?Sized>(
    schema: &PointAttributeSchema,
    bytes: &[u8],
    point: &mut P,
) -> Result<(), CodecError> {
    let layout = schema.layout();
    if bytes.len() < layout.point_size() {
        return Err(CodecError::TruncatedBuffer {
            expected: layout.point_size(),
            actual: bytes.len(),
        });
    }

    for (attribute, ty) in schema.attributes() {
        let offset = layout.offset(attribute).unwrap_or_default();
        let value = AttributeValue::read_le(ty, &bytes[offset..offset + ty.size()]);
        if !point.set(attribute, value) {
            return Err(unsupported(point, attribute));
        }
    }
    Ok(())
}

/// Encodes a contiguous run of points, `points.len() * point_size` bytes.
pub fn encode_points<P: PointAccessor>(
    schema: &PointAttributeSchema,
    points: &[P],
) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(points.len() * schema.point_size());
    for point in points {
        encode_into(schema, point, &mut buf)?;
    }
    Ok(buf)
}

/// Decodes every point of a buffer produced by [`encode_points`].
pub fn decode_points<P: PointAccessor + Default>(
    schema: &PointAttributeSchema,
    bytes: &[u8],
) -> Result<Vec<P>, CodecError> {
    let point_size = schema.point_size();
    let count = bytes.len() / point_size;
    if bytes.len() % point_size != 0 {
        return Err(CodecError::TruncatedBuffer {
            expected: (count + 1) * point_size,
            actual: bytes.len(),
        });
    }

    let mut points = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(point_size) {
        let mut point = P::default();
        decode_unstaged(schema, chunk, &mut point)?;
        points.push(point);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::schema::PointKind;
    use crate::point::types::{PosD3, PosD3ColF3LblB, PosD3NorF3ColF3InUs};
    use crate::point::PointData;

    fn full_schema() -> PointAttributeSchema {
        PointAttributeSchema::new(VectorType::Vec3F64)
            .with_intensity(ScalarType::UInt16)
            .with_normal(VectorType::Vec3F32)
            .with_color(ScalarType::UInt32)
            .with_label(ScalarType::UInt8)
            .with_curvature(ScalarType::Float32)
            .with_hit_count(ScalarType::Int64)
            .with_gps_time(ScalarType::Float64)
    }

    fn full_point() -> PointData {
        PointData::default()
            .with(Attribute::Position, AttributeValue::Vec3F64(DVec3::new(1.5, -2.25, 1e9)))
            .with(Attribute::Intensity, AttributeValue::UInt16(65000))
            .with(Attribute::Normal, AttributeValue::Vec3F32(Vec3::new(0.0, 0.6, 0.8)))
            .with(Attribute::Color, AttributeValue::UInt32(0x00ff_8040))
            .with(Attribute::Label, AttributeValue::UInt8(200))
            .with(Attribute::Curvature, AttributeValue::Float32(0.125))
            .with(Attribute::HitCount, AttributeValue::Int64(-7))
            .with(Attribute::GpsTime, AttributeValue::Float64(123_456.789))
    }

    #[test]
    fn every_attribute_round_trips() {
        let schema = full_schema();
        let point = full_point();
        let bytes = encode(&schema, Some(&point)).unwrap();
        assert_eq!(bytes.len(), schema.point_size());

        let mut decoded = PointData::default();
        decode(&schema, &bytes, &mut decoded).unwrap();
        assert_eq!(decoded, point);
    }

    #[test]
    fn bytes_follow_the_offset_table() {
        let schema = full_schema();
        let bytes = encode(&schema, Some(&full_point())).unwrap();

        assert_eq!(LittleEndian::read_f64(&bytes[0..8]), 1.5);
        assert_eq!(LittleEndian::read_u16(&bytes[24..26]), 65000);
        assert_eq!(LittleEndian::read_u32(&bytes[38..42]), 0x00ff_8040);
        assert_eq!(bytes[42], 200);
        assert_eq!(LittleEndian::read_f32(&bytes[43..47]), 0.125);
        assert_eq!(LittleEndian::read_i64(&bytes[47..55]), -7);
    }

    #[test]
    fn undeclared_attributes_are_untouched() {
        let schema = PointKind::PosD3.schema();
        let source = PosD3 { position: DVec3::new(3.0, 2.0, 1.0) };
        let bytes = encode(&schema, Some(&source)).unwrap();

        let mut target = PosD3ColF3LblB {
            position: DVec3::ZERO,
            color: Vec3::ONE,
            label: 9,
        };
        decode(&schema, &bytes, &mut target).unwrap();
        assert_eq!(target.position, source.position);
        assert_eq!(target.color, Vec3::ONE);
        assert_eq!(target.label, 9);
    }

    #[test]
    fn missing_points_fail() {
        let schema = PointKind::PosD3.schema();
        assert_eq!(encode::<PosD3>(&schema, None), Err(CodecError::NullPoint));
    }

    #[test]
    fn short_buffers_fail() {
        let schema = PointKind::PosD3InUs.schema();
        let mut point = PointData::default();
        assert_eq!(
            decode(&schema, &[0; 25], &mut point),
            Err(CodecError::TruncatedBuffer { expected: 26, actual: 25 })
        );
        assert!(decode_points::<PointData>(&schema, &[0; 27]).is_err());
    }

    #[test]
    fn representation_mismatch_names_kind_and_attribute() {
        let schema = PointKind::PosD3NorF3ColF3InUs.schema();
        let point = PosD3 { position: DVec3::ONE };
        let err = encode(&schema, Some(&point)).unwrap_err();
        assert_eq!(
            err,
            CodecError::Schema(SchemaError::UnsupportedAttributeAccess {
                kind: "PosD3".to_string(),
                attribute: Attribute::Intensity,
            })
        );

        let wide_color = PointAttributeSchema::new(VectorType::Vec3F64).with_color(ScalarType::UInt32);
        let bytes = encode(&wide_color, Some(&full_point())).unwrap();
        let mut target = PosD3NorF3ColF3InUs::default();
        assert!(matches!(
            decode(&wide_color, &bytes, &mut target),
            Err(CodecError::Schema(SchemaError::UnsupportedAttributeAccess {
                attribute: Attribute::Color,
                ..
            }))
        ));
    }

    #[test]
    fn rejected_points_keep_their_previous_values() {
        let wide_color = PointAttributeSchema::new(VectorType::Vec3F64).with_color(ScalarType::UInt32);
        let bytes = encode(&wide_color, Some(&full_point())).unwrap();

        let before = PosD3NorF3ColF3InUs {
            position: DVec3::splat(-4.0),
            intensity: 3,
            normal: Vec3::Y,
            color: Vec3::ONE,
        };
        let mut target = before;
        assert!(decode(&wide_color, &bytes, &mut target).is_err());
        // position precedes the rejected color but must not be committed
        assert_eq!(target, before);
    }

    #[test]
    fn batches_are_contiguous() {
        let schema = PointKind::PosD3ColF3LblB.schema();
        let points: Vec<PosD3ColF3LblB> = (0..4)
            .map(|i| PosD3ColF3LblB {
                position: DVec3::splat(i as f64),
                color: Vec3::new(0.1, 0.2, i as f32),
                label: i as u8,
            })
            .collect();

        let bytes = encode_points(&schema, &points).unwrap();
        assert_eq!(bytes.len(), 4 * 37);
        assert_eq!(bytes[37 + 36], 1);

        let decoded: Vec<PosD3ColF3LblB> = decode_points(&schema, &bytes).unwrap();
        assert_eq!(decoded, points);
        assert!(decode_points::<PosD3ColF3LblB>(&schema, &[]).unwrap().is_empty());
    }
}
