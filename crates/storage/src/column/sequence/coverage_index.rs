use std::collections::BTreeMap;

use roaring::RoaringBitmap;
use roaring_util::{full_bitmap, v_tile_of};

/// Per-row horizontal coverage of one sequence column partition.
///
/// A row is covered at a position iff the position lies in the row's
/// `[start, end)` range and is not listed in the row's missing bitmap.
/// Rows without a single observed symbol carry the empty range `[0, 0)`.
#[derive(Debug, Default)]
pub struct HorizontalCoverageIndex {
    /// One `[start, end)` range per row.
    pub start_end: Vec<(u32, u32)>,
    /// Missing positions inside the covered range, for rows that have
    /// any. Keyed by row id, ascending.
    pub missing_bitmaps: BTreeMap<u32, RoaringBitmap>,
    /// Merged (min start, max end) per v_tile of rows, to skip whole
    /// tiles when probing a position.
    pub batch_start_ends: Vec<(u32, u32)>,
}

impl HorizontalCoverageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> u32 {
        self.start_end.len() as u32
    }

    /// Register the next row's coverage. `missing_positions` lists the
    /// positions of missing symbols; entries outside `[start, end)` are
    /// dropped.
    pub fn insert_coverage(&mut self, start: u32, end: u32, missing_positions: &[u32]) {
        let row_id = self.start_end.len() as u32;
        self.start_end.push((start, end));

        if row_id & 0xFFFF == 0 {
            self.batch_start_ends.push((start, end));
        } else {
            let (batch_start, batch_end) = self
                .batch_start_ends
                .last_mut()
                .expect("first row of the tile created the batch entry");
            *batch_start = (*batch_start).min(start);
            *batch_end = (*batch_end).max(end);
        }
        debug_assert_eq!(self.batch_start_ends.len(), v_tile_of(row_id) as usize + 1);

        let mut missing = RoaringBitmap::new();
        for position in missing_positions {
            if (start..end).contains(position) {
                missing.insert(*position);
            }
        }
        if !missing.is_empty() {
            self.missing_bitmaps.insert(row_id, missing);
        }
    }

    /// Register a row with no observed symbols at all.
    pub fn insert_null_row(&mut self) {
        self.insert_coverage(0, 0, &[]);
    }

    pub fn is_covered(&self, row_id: u32, position: u32) -> bool {
        let (start, end) = self.start_end[row_id as usize];
        (start..end).contains(&position)
            && self
                .missing_bitmaps
                .get(&row_id)
                .map_or(true, |missing| !missing.contains(position))
    }

    /// All rows covered at `position`. Tiles whose merged range misses
    /// the position are skipped wholesale.
    pub fn covered_bitmap(&self, position: u32) -> RoaringBitmap {
        let mut covered = RoaringBitmap::new();
        let mut missing_iter = self.missing_bitmaps.iter().peekable();
        for (tile, (batch_start, batch_end)) in self.batch_start_ends.iter().enumerate() {
            let tile_first = (tile as u32) << 16;
            let tile_last = tile_first + 0xFFFF;
            if !(*batch_start..*batch_end).contains(&position) {
                while missing_iter
                    .peek()
                    .is_some_and(|(row_id, _)| **row_id <= tile_last)
                {
                    missing_iter.next();
                }
                continue;
            }
            let tile_end = (tile_first + 0x10000).min(self.row_count());
            for row_id in tile_first..tile_end {
                let (start, end) = self.start_end[row_id as usize];
                if !(start..end).contains(&position) {
                    continue;
                }
                let mut in_missing = false;
                while let Some((missing_row, missing)) = missing_iter.peek() {
                    if **missing_row < row_id {
                        missing_iter.next();
                    } else {
                        if **missing_row == row_id {
                            in_missing = missing.contains(position);
                        }
                        break;
                    }
                }
                if !in_missing {
                    covered.push(row_id);
                }
            }
        }
        covered
    }

    /// All rows not covered at `position`.
    pub fn not_covered_bitmap(&self, position: u32) -> RoaringBitmap {
        let mut result = full_bitmap(self.row_count());
        result -= self.covered_bitmap(position);
        result
    }

    /// Overlay the missing symbol onto reconstruction buffers: outside
    /// each row's covered range and at its missing positions.
    pub fn overwrite_missing(
        &self,
        sequences: &mut [Vec<u8>],
        row_ids: &RoaringBitmap,
        missing_chr: u8,
    ) {
        for (sequence, row_id) in sequences.iter_mut().zip(row_ids.iter()) {
            let (start, end) = self.start_end[row_id as usize];
            let len = sequence.len() as u32;
            for position in 0..start.min(len) {
                sequence[position as usize] = missing_chr;
            }
            for position in end..len {
                sequence[position as usize] = missing_chr;
            }
            if let Some(missing) = self.missing_bitmaps.get(&row_id) {
                for position in missing.iter() {
                    if position < len {
                        sequence[position as usize] = missing_chr;
                    }
                }
            }
        }
    }

    /// Total bitmap bytes, for index statistics.
    pub fn size_in_bytes(&self) -> usize {
        self.start_end.len() * 8
            + self
                .missing_bitmaps
                .values()
                .map(|bitmap| bitmap.serialized_size())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn index_of(rows: &[(u32, u32, &[u32])]) -> HorizontalCoverageIndex {
        let mut index = HorizontalCoverageIndex::new();
        for (start, end, missing) in rows {
            index.insert_coverage(*start, *end, missing);
        }
        index
    }

    #[test]
    fn test_covered_respects_range_and_missing() {
        let index = index_of(&[(0, 5, &[]), (1, 4, &[2]), (0, 0, &[])]);
        assert!(index.is_covered(0, 0));
        assert!(index.is_covered(1, 1));
        assert!(!index.is_covered(1, 0)); // before start
        assert!(!index.is_covered(1, 4)); // at end
        assert!(!index.is_covered(1, 2)); // missing inside range
        assert!(!index.is_covered(2, 0)); // fully missing row
    }

    #[test]
    fn test_covered_and_not_covered_partition_the_rows() {
        let index = index_of(&[(0, 5, &[]), (1, 4, &[2]), (0, 0, &[])]);
        for position in 0..5 {
            let covered = index.covered_bitmap(position);
            let not_covered = index.not_covered_bitmap(position);
            assert_eq!((covered.clone() | not_covered.clone()).len(), 3);
            assert!((covered & not_covered).is_empty());
        }
        assert_eq!(
            index.covered_bitmap(2).iter().collect::<Vec<_>>(),
            [0],
            "row 1 is missing at 2, row 2 is a null row"
        );
    }

    #[test]
    fn test_out_of_range_missing_positions_are_dropped() {
        let index = index_of(&[(2, 4, &[0, 2, 9])]);
        let missing = index.missing_bitmaps.get(&0).unwrap();
        assert_eq!(missing.iter().collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn test_overwrite_missing_masks_uncovered_positions() {
        let index = index_of(&[(1, 4, &[2]), (0, 5, &[])]);
        let filter = RoaringBitmap::from_iter([0u32, 1]);
        let mut sequences = vec![b"ACGTA".to_vec(), b"ACGTA".to_vec()];
        index.overwrite_missing(&mut sequences, &filter, b'N');
        assert_eq!(sequences[0], b"NCNTN");
        assert_eq!(sequences[1], b"ACGTA");
    }
}
