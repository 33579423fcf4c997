use crate::point::codec::{decode, CodecError, PointAccessor};
use crate::point::schema::PointAttributeSchema;

/// Outcome of a successful read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Read,
    Exhausted,
}

/// Source of points sharing one schema.
pub trait PointReader {
    fn schema(&self) -> &PointAttributeSchema;

    /// Total number of points the dataset announces.
    fn point_count(&self) -> u64;

    fn read_point<P: PointAccessor + Clone>(&mut self, point: &mut P) -> Result<ReadStatus, CodecError>;

    /// Fills `points` from the front and returns how many were read. Zero
    /// means the reader is exhausted.
    fn read_points<P: PointAccessor + Clone>(&mut self, points: &mut [P]) -> Result<usize, CodecError> {
        let mut read = 0;
        for point in points.iter_mut() {
            match self.read_point(point)? {
                ReadStatus::Read => read += 1,
                ReadStatus::Exhausted => break,
            }
        }
        Ok(read)
    }

    /// Reads every remaining point. A trailing partial point is an error.
    fn read_all<P: PointAccessor + Clone + Default>(&mut self) -> Result<Vec<P>, CodecError> {
        let mut points = Vec::new();
        let mut batch = vec![P::default(); READ_BATCH];
        loop {
            let read = self.read_points(&mut batch)?;
            if read == 0 {
                return Ok(points);
            }
            points.extend_from_slice(&batch[..read]);
        }
    }
}

const READ_BATCH: usize = 1024;

/// Reads points back from a codec encoded buffer.
#[derive(Clone, Debug)]
pub struct BufferPointReader {
    schema: PointAttributeSchema,
    bytes: Vec<u8>,
    cursor: usize,
}

impl BufferPointReader {
    pub fn new(schema: PointAttributeSchema, bytes: Vec<u8>) -> Self {
        Self {
            schema,
            bytes,
            cursor: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        (self.bytes.len() - self.cursor) / self.schema.point_size()
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl PointReader for BufferPointReader {
    fn schema(&self) -> &PointAttributeSchema {
        &self.schema
    }

    fn point_count(&self) -> u64 {
        (self.bytes.len() / self.schema.point_size()) as u64
    }

    fn read_point<P: PointAccessor + Clone>(&mut self, point: &mut P) -> Result<ReadStatus, CodecError> {
        if self.cursor == self.bytes.len() {
            return Ok(ReadStatus::Exhausted);
        }
        decode(&self.schema, &self.bytes[self.cursor..], point)?;
        self.cursor += self.schema.point_size();
        Ok(ReadStatus::Read)
    }
}
