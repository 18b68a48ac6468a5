use std::collections::BTreeMap;

use roaring::RoaringBitmap;

/// Rows by inserted substring, per position.
///
/// Insertions live between reference positions and are not part of the
/// aligned coordinate system; they are indexed verbatim as upper-case
/// literals.
#[derive(Debug, Default)]
pub struct InsertionIndex {
    insertions: BTreeMap<u32, BTreeMap<String, RoaringBitmap>>,
}

impl InsertionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: u32, contents: &str, row_id: u32) {
        self.insertions
            .entry(position)
            .or_default()
            .entry(contents.to_ascii_uppercase())
            .or_default()
            .insert(row_id);
    }

    /// Rows with exactly `contents` inserted at `position`.
    pub fn bitmap_for(&self, position: u32, contents: &str) -> Option<&RoaringBitmap> {
        self.insertions
            .get(&position)?
            .get(&contents.to_ascii_uppercase())
    }

    /// Union of the rows of every literal at `position` accepted by
    /// `matches`. Serves regex-style insertion queries.
    pub fn search(&self, position: u32, mut matches: impl FnMut(&str) -> bool) -> RoaringBitmap {
        let Some(by_literal) = self.insertions.get(&position) else {
            return RoaringBitmap::new();
        };
        let mut result = RoaringBitmap::new();
        for (literal, rows) in by_literal {
            if matches(literal) {
                result |= rows;
            }
        }
        result
    }

    /// Every (position, literal, rows) entry, for aggregation.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str, &RoaringBitmap)> {
        self.insertions.iter().flat_map(|(position, by_literal)| {
            by_literal
                .iter()
                .map(|(literal, rows)| (*position, literal.as_str(), rows))
        })
    }

    pub fn shrink_to_fit(&mut self) {
        // Roaring bitmaps of single insertions are tiny already; only
        // run-optimize the larger ones.
        for by_literal in self.insertions.values_mut() {
            for bitmap in by_literal.values_mut() {
                bitmap.optimize();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_literal_lookup_is_case_insensitive() {
        let mut index = InsertionIndex::new();
        index.insert(2, "acg", 0);
        index.insert(2, "ACG", 3);
        let rows = index.bitmap_for(2, "AcG").unwrap();
        assert_eq!(rows.iter().collect::<Vec<_>>(), [0, 3]);
        assert!(index.bitmap_for(3, "ACG").is_none());
    }

    #[test]
    fn test_search_unions_matching_literals() {
        let mut index = InsertionIndex::new();
        index.insert(7, "A", 0);
        index.insert(7, "AG", 1);
        index.insert(7, "TT", 2);
        let rows = index.search(7, |literal| literal.starts_with('A'));
        assert_eq!(rows.iter().collect::<Vec<_>>(), [0, 1]);
        assert!(index.search(9, |_| true).is_empty());
    }

    #[test]
    fn test_iter_walks_positions_in_order() {
        let mut index = InsertionIndex::new();
        index.insert(9, "C", 1);
        index.insert(2, "A", 0);
        let entries: Vec<_> = index.iter().map(|(pos, lit, _)| (pos, lit.to_string())).collect();
        assert_eq!(entries, [(2, "A".to_string()), (9, "C".to_string())]);
    }
}
