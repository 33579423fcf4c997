pub mod codec;
pub mod reader;
pub mod schema;
pub mod types;

use crate::point::codec::{AttributeValue, PointAccessor};
use crate::point::schema::Attribute;

/// A point whose attributes are only known at runtime, for datasets whose
/// schema has no canonical kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointData {
    values: [Option<AttributeValue>; 8],
}

impl PointData {
    pub fn with(mut self, attribute: Attribute, value: AttributeValue) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn clear(&mut self) {
        self.values = [None; 8];
    }
}

impl PointAccessor for PointData {
    fn get(&self, attribute: Attribute) -> Option<AttributeValue> {
        self.values[attribute as usize]
    }

    fn set(&mut self, attribute: Attribute, value: AttributeValue) -> bool {
        self.values[attribute as usize] = Some(value);
        true
    }

    fn kind_name(&self) -> &str {
        "PointData"
    }
}
