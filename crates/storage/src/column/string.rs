use std::sync::Arc;

use crate::intern::{Interner, SiloString};

/// The rows of one STRING column in one partition: inline 16-byte
/// fingerprints, with the full strings living in the column's shared
/// intern table.
///
/// There is no reserved null encoding; absent values are stored as the
/// empty string and projected back as null.
#[derive(Debug)]
pub struct StringColumnPartition {
    pub values: Vec<SiloString>,
    pub interner: Arc<Interner>,
}

impl StringColumnPartition {
    pub fn new(interner: Arc<Interner>) -> Self {
        StringColumnPartition {
            values: Vec::new(),
            interner,
        }
    }

    pub fn append(&mut self, value: Option<&str>) {
        let fingerprint = self.interner.intern(value.unwrap_or(""));
        self.values.push(fingerprint);
    }

    pub fn fingerprint(&self, row_id: u32) -> SiloString {
        self.values[row_id as usize]
    }

    pub fn value(&self, row_id: u32) -> Option<String> {
        let resolved = self
            .interner
            .resolve(&self.values[row_id as usize])
            .unwrap_or_default();
        (!resolved.is_empty()).then_some(resolved)
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
