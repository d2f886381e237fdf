use crate::constants::FieldSpec;
use crate::error::BatchError;
use crate::protocol::encode_value;

/// One actuator's payload inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// Per-actuator payloads for a single control-table field, queued for one
/// multi-target write. Insertion order is transmission order.
#[derive(Clone, Debug)]
pub struct ParameterBatch {
    field: FieldSpec,
    entries: Vec<BatchEntry>,
}

impl ParameterBatch {
    pub fn new(field: FieldSpec) -> Self {
        Self {
            field,
            entries: vec![],
        }
    }

    pub fn field(&self) -> FieldSpec {
        self.field
    }

    pub fn add_entry(&mut self, id: u8, value: u32) -> Result<(), BatchError> {
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(BatchError::DuplicateEntry { id });
        }
        let payload = encode_value(value, self.field.width)?;
        self.entries.push(BatchEntry { id, payload });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
