use std::sync::{Arc, RwLock};

use fxhash::FxHashMap;
use roaring::RoaringBitmap;

/// The shared symbol table of one INDEXED_STRING column. Value ids are
/// allocated on first sight and are stable across partitions. Id `0` is
/// the empty string, which doubles as the null representation.
#[derive(Debug)]
pub struct Dictionary {
    inner: RwLock<DictionaryInner>,
}

#[derive(Debug)]
struct DictionaryInner {
    values: Vec<String>,
    ids: FxHashMap<String, u32>,
}

impl Default for Dictionary {
    fn default() -> Self {
        let mut ids = FxHashMap::default();
        ids.insert(String::new(), 0);
        Dictionary {
            inner: RwLock::new(DictionaryInner {
                values: vec![String::new()],
                ids,
            }),
        }
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id of `value`, allocating one if the value is new.
    pub fn intern(&self, value: &str) -> u32 {
        if let Some(id) = self.lookup(value) {
            return id;
        }
        let mut inner = self.inner.write().expect("dictionary lock poisoned");
        if let Some(id) = inner.ids.get(value) {
            return *id;
        }
        let id = inner.values.len() as u32;
        inner.values.push(value.to_string());
        inner.ids.insert(value.to_string(), id);
        id
    }

    /// The id of `value` if it has ever been seen.
    pub fn lookup(&self, value: &str) -> Option<u32> {
        self.inner
            .read()
            .expect("dictionary lock poisoned")
            .ids
            .get(value)
            .copied()
    }

    pub fn resolve(&self, id: u32) -> Option<String> {
        self.inner
            .read()
            .expect("dictionary lock poisoned")
            .values
            .get(id as usize)
            .cloned()
    }

    pub fn len(&self) -> u32 {
        self.inner.read().expect("dictionary lock poisoned").values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all values accepted by `predicate`.
    pub fn ids_matching(&self, mut predicate: impl FnMut(&str) -> bool) -> Vec<u32> {
        let inner = self.inner.read().expect("dictionary lock poisoned");
        inner
            .values
            .iter()
            .enumerate()
            .filter(|(_, value)| predicate(value))
            .map(|(id, _)| id as u32)
            .collect()
    }
}

/// The rows of one INDEXED_STRING column in one partition, plus the
/// per-value row bitmaps that serve equality filters.
#[derive(Debug)]
pub struct IndexedStringColumnPartition {
    pub values: Vec<u32>,
    pub dictionary: Arc<Dictionary>,
    /// One bitmap per dictionary id, built by `finalize`.
    pub value_bitmaps: Vec<RoaringBitmap>,
}

impl IndexedStringColumnPartition {
    pub fn new(dictionary: Arc<Dictionary>) -> Self {
        IndexedStringColumnPartition {
            values: Vec::new(),
            dictionary,
            value_bitmaps: Vec::new(),
        }
    }

    pub fn append(&mut self, value: Option<&str>) {
        self.values.push(self.dictionary.intern(value.unwrap_or("")));
    }

    pub fn value_id(&self, row_id: u32) -> u32 {
        self.values[row_id as usize]
    }

    pub fn value(&self, row_id: u32) -> Option<String> {
        let resolved = self
            .dictionary
            .resolve(self.values[row_id as usize])
            .unwrap_or_default();
        (!resolved.is_empty()).then_some(resolved)
    }

    /// The rows holding `value_id`; empty if the id never occurs in this
    /// partition.
    pub fn bitmap_for(&self, value_id: u32) -> Option<&RoaringBitmap> {
        self.value_bitmaps.get(value_id as usize)
    }

    /// Build the per-value row bitmaps. Called once, after ingest.
    pub fn finalize(&mut self) {
        let mut bitmaps = vec![RoaringBitmap::new(); self.dictionary.len() as usize];
        for (row_id, value_id) in self.values.iter().enumerate() {
            bitmaps[*value_id as usize].push(row_id as u32);
        }
        self.value_bitmaps = bitmaps;
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
