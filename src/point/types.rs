//! Concrete point structs, one per [`PointKind`].

use crate::point::codec::{AttributeValue, PointAccessor};
use crate::point::schema::{Attribute, PointKind};
use glam::{DVec3, Vec3};

macro_rules! canonical_point {
    (
        $(#[$meta:meta])*
        $name:ident { $($field:ident: $ty:ty => $attribute:ident as $variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)+
        }

        impl $name {
            pub const KIND: PointKind = PointKind::$name;
        }

        impl PointAccessor for $name {
            fn get(&self, attribute: Attribute) -> Option<AttributeValue> {
                match attribute {
                    $(Attribute::$attribute => Some(AttributeValue::$variant(self.$field)),)+
                    _ => None,
                }
            }

            fn set(&mut self, attribute: Attribute, value: AttributeValue) -> bool {
                match (attribute, value) {
                    $((Attribute::$attribute, AttributeValue::$variant(value)) => {
                        self.$field = value;
                        true
                    })+
                    _ => false,
                }
            }

            fn kind_name(&self) -> &str {
                stringify!($name)
            }
        }
    };
}

canonical_point! {
    PosD3 {
        position: DVec3 => Position as Vec3F64,
    }
}

canonical_point! {
    PosD3ColF3InUs {
        position: DVec3 => Position as Vec3F64,
        intensity: u16 => Intensity as UInt16,
        color: Vec3 => Color as Vec3F32,
    }
}

canonical_point! {
    PosD3InUs {
        position: DVec3 => Position as Vec3F64,
        intensity: u16 => Intensity as UInt16,
    }
}

canonical_point! {
    PosD3ColF3 {
        position: DVec3 => Position as Vec3F64,
        color: Vec3 => Color as Vec3F32,
    }
}

canonical_point! {
    /// Position with a classification label.
    PosD3LblB {
        position: DVec3 => Position as Vec3F64,
        label: u8 => Label as UInt8,
    }
}

canonical_point! {
    PosD3NorF3ColF3InUs {
        position: DVec3 => Position as Vec3F64,
        intensity: u16 => Intensity as UInt16,
        normal: Vec3 => Normal as Vec3F32,
        color: Vec3 => Color as Vec3F32,
    }
}

canonical_point! {
    PosD3NorF3InUs {
        position: DVec3 => Position as Vec3F64,
        intensity: u16 => Intensity as UInt16,
        normal: Vec3 => Normal as Vec3F32,
    }
}

canonical_point! {
    PosD3NorF3ColF3 {
        position: DVec3 => Position as Vec3F64,
        normal: Vec3 => Normal as Vec3F32,
        color: Vec3 => Color as Vec3F32,
    }
}

canonical_point! {
    /// Position, color and classification label.
    PosD3ColF3LblB {
        position: DVec3 => Position as Vec3F64,
        color: Vec3 => Color as Vec3F32,
        label: u8 => Label as UInt8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::codec::{decode, encode};

    #[test]
    fn each_struct_matches_its_kind_schema() {
        let point = PosD3NorF3ColF3InUs {
            position: DVec3::new(10.0, 20.0, 30.0),
            intensity: 512,
            normal: Vec3::Z,
            color: Vec3::new(1.0, 0.5, 0.25),
        };
        let schema = PosD3NorF3ColF3InUs::KIND.schema();
        let bytes = encode(&schema, Some(&point)).unwrap();
        assert_eq!(bytes.len(), 24 + 2 + 12 + 12);

        let mut decoded = PosD3NorF3ColF3InUs::default();
        decode(&schema, &bytes, &mut decoded).unwrap();
        assert_eq!(decoded, point);
    }

    #[test]
    fn wrong_representation_is_refused() {
        let mut point = PosD3InUs::default();
        assert!(!point.set(Attribute::Intensity, AttributeValue::UInt32(5)));
        assert!(!point.set(Attribute::Normal, AttributeValue::Vec3F32(Vec3::X)));
        assert!(point.set(Attribute::Intensity, AttributeValue::UInt16(5)));
        assert_eq!(point.get(Attribute::Intensity), Some(AttributeValue::UInt16(5)));
        assert_eq!(point.get(Attribute::Color), None);
        assert_eq!(point.kind_name(), "PosD3InUs");
    }
}
