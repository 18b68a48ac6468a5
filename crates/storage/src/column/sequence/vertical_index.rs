use std::collections::BTreeMap;

use alphabet::{Symbol, SymbolMap};
use roaring::RoaringBitmap;
use roaring_util::{
    low_bits_of, subset_ranks, v_tile_of, BitmapBuilderByContainer, Container,
};

/// Key of one vertical-index container: the rows in v_tile `v_tile`
/// whose symbol at `position` differs from the local reference and
/// equals `symbol`.
///
/// The field order gives the map order the query path depends on: all
/// entries of one position are contiguous, ascending by v_tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiffKey<S: Symbol> {
    pub position: u32,
    pub v_tile: u16,
    pub symbol: S,
}

/// The per-position symbol index of one sequence column partition.
///
/// Containers store the low 16 bits of their rows; the v_tile in the
/// key supplies the high bits, so one entry lines up with one roaring
/// container of the assembled result.
#[derive(Debug, Default)]
pub struct VerticalSequenceIndex<S: Symbol> {
    diffs: BTreeMap<DiffKey<S>, Container>,
}

impl<S: Symbol> VerticalSequenceIndex<S> {
    pub fn new() -> Self {
        VerticalSequenceIndex {
            diffs: BTreeMap::new(),
        }
    }

    fn first_symbol() -> S {
        S::from_index(0).expect("alphabets are non-empty")
    }

    /// Record that the ascending `row_ids` hold `symbol` at `position`.
    pub fn add_symbol_rows(&mut self, position: u32, symbol: S, row_ids: &[u32]) {
        let mut idx = 0;
        while idx < row_ids.len() {
            let tile = v_tile_of(row_ids[idx]);
            let run_end = row_ids[idx..]
                .iter()
                .position(|row_id| v_tile_of(*row_id) != tile)
                .map(|offset| idx + offset)
                .unwrap_or(row_ids.len());
            let key = DiffKey {
                position,
                v_tile: tile,
                symbol,
            };
            let container = self
                .diffs
                .entry(key)
                .or_insert_with(|| Container::with_capacity(run_end - idx));
            for row_id in &row_ids[idx..run_end] {
                container.push_sorted(low_bits_of(*row_id));
            }
            idx = run_end;
        }
    }

    /// All entries of one position, ascending by (v_tile, symbol).
    pub fn range(&self, position: u32) -> impl Iterator<Item = (&DiffKey<S>, &Container)> {
        let lo = DiffKey {
            position,
            v_tile: 0,
            symbol: Self::first_symbol(),
        };
        let hi = DiffKey {
            position: position + 1,
            v_tile: 0,
            symbol: Self::first_symbol(),
        };
        self.diffs.range(lo..hi)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DiffKey<S>, &Container)> {
        self.diffs.iter()
    }

    /// Union of all containers at `position` whose symbol is in
    /// `symbols`, assembled container by container in one linear pass.
    pub fn matching_containers_as_bitmap(&self, position: u32, symbols: &[S]) -> RoaringBitmap {
        let mut builder = BitmapBuilderByContainer::new();
        for (key, container) in self.range(position) {
            if symbols.contains(&key.symbol) {
                builder.add_container(key.v_tile, container);
            }
        }
        builder.into_bitmap()
    }

    /// Does `row_id` have a diff at `position`, and under which symbol?
    pub fn symbol_of_row(&self, position: u32, row_id: u32) -> Option<S> {
        let tile = v_tile_of(row_id);
        let low = low_bits_of(row_id);
        self.range(position)
            .filter(|(key, _)| key.v_tile == tile)
            .find(|(_, container)| container.contains(low))
            .map(|(key, _)| key.symbol)
    }

    /// Occurrences of every symbol at `position`, given the number of
    /// covered rows. The reference symbol's count is what remains after
    /// all indexed diffs are subtracted.
    pub fn symbol_counts_for_position(
        &self,
        position: u32,
        reference_symbol: S,
        covered_count: u32,
    ) -> SymbolMap<S, u32> {
        let mut counts: SymbolMap<S, u32> = SymbolMap::default();
        counts[reference_symbol] = covered_count;
        for (key, container) in self.range(position) {
            debug_assert!(key.symbol != reference_symbol);
            counts[key.symbol] += container.cardinality();
            counts[reference_symbol] -= container.cardinality();
        }
        counts
    }

    /// Re-key `position` to a better local reference, if any symbol
    /// occurs more often than the current one. Rows that held the old
    /// reference become explicit diffs; entries of the new reference
    /// are dropped. Returns the new reference symbol on change.
    pub fn adapt_local_reference(
        &mut self,
        covered_bitmap: &RoaringBitmap,
        position: u32,
        reference_symbol: S,
    ) -> Option<S> {
        let counts = self.symbol_counts_for_position(
            position,
            reference_symbol,
            covered_bitmap.len() as u32,
        );
        let best_symbol = S::SYMBOLS
            .iter()
            .copied()
            .max_by_key(|symbol| (counts[*symbol], std::cmp::Reverse(symbol.index())))
            .expect("alphabets are non-empty");
        if best_symbol == reference_symbol || counts[best_symbol] <= counts[reference_symbol] {
            return None;
        }

        // Rows carrying the old reference: covered minus every diff.
        let mut old_reference_rows = covered_bitmap.clone();
        old_reference_rows -= self.matching_containers_as_bitmap(position, S::SYMBOLS);

        let mut tile_container: Option<(u16, Container)> = None;
        for row_id in old_reference_rows.iter() {
            let tile = v_tile_of(row_id);
            match &mut tile_container {
                Some((current, container)) if *current == tile => {
                    container.push_sorted(low_bits_of(row_id));
                }
                _ => {
                    if let Some((done_tile, container)) = tile_container.take() {
                        self.insert_reference_diff(position, done_tile, reference_symbol, container);
                    }
                    let mut container = Container::default();
                    container.push_sorted(low_bits_of(row_id));
                    tile_container = Some((tile, container));
                }
            }
        }
        if let Some((done_tile, container)) = tile_container.take() {
            self.insert_reference_diff(position, done_tile, reference_symbol, container);
        }

        let obsolete: Vec<DiffKey<S>> = self
            .range(position)
            .filter(|(key, _)| key.symbol == best_symbol)
            .map(|(key, _)| *key)
            .collect();
        for key in obsolete {
            self.diffs.remove(&key);
        }

        Some(best_symbol)
    }

    fn insert_reference_diff(&mut self, position: u32, v_tile: u16, symbol: S, container: Container) {
        if container.is_empty() {
            return;
        }
        let replaced = self.diffs.insert(
            DiffKey {
                position,
                v_tile,
                symbol,
            },
            container,
        );
        debug_assert!(replaced.is_none(), "old reference symbol had diff entries");
    }

    /// Overwrite diff positions in `sequences`, the reconstruction
    /// buffers of the rows in `row_ids` in ascending order.
    pub fn overwrite_symbols(&self, sequences: &mut [Vec<u8>], row_ids: &RoaringBitmap) {
        debug_assert_eq!(sequences.len() as u64, row_ids.len());
        if sequences.is_empty() {
            return;
        }

        // Slice the output per v_tile, one filter container per slice.
        let mut filter_containers: Vec<(u16, Container, usize)> = Vec::new();
        let mut offset = 0usize;
        for row_id in row_ids.iter() {
            let tile = v_tile_of(row_id);
            match filter_containers.last_mut() {
                Some((current, container, _)) if *current == tile => {
                    container.push_sorted(low_bits_of(row_id));
                }
                _ => {
                    let mut container = Container::default();
                    container.push_sorted(low_bits_of(row_id));
                    filter_containers.push((tile, container, offset));
                }
            }
            offset += 1;
        }

        for (key, diff) in self.diffs.iter() {
            let Ok(found) =
                filter_containers.binary_search_by_key(&key.v_tile, |(tile, _, _)| *tile)
            else {
                continue;
            };
            let (_, filter, slice_offset) = &filter_containers[found];
            let chr = key.symbol.to_char() as u8;
            for rank in subset_ranks(filter, diff) {
                // Ranks are 1-based within the tile's slice.
                sequences[slice_offset + rank as usize - 1][key.position as usize] = chr;
            }
        }
    }

    /// Insert a fully built container, used when loading from disk.
    pub fn insert_raw(&mut self, key: DiffKey<S>, container: Container) {
        if !container.is_empty() {
            self.diffs.insert(key, container);
        }
    }

    pub fn shrink_to_fit(&mut self) {
        for container in self.diffs.values_mut() {
            container.shrink_to_fit();
        }
    }

    /// Total container bytes, for index statistics.
    pub fn size_in_bytes(&self) -> usize {
        self.diffs
            .values()
            .map(|container| container.size_in_bytes())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alphabet::Nucleotide;

    fn index_with(entries: &[(u32, Nucleotide, &[u32])]) -> VerticalSequenceIndex<Nucleotide> {
        let mut index = VerticalSequenceIndex::new();
        for (position, symbol, rows) in entries {
            index.add_symbol_rows(*position, *symbol, rows);
        }
        index
    }

    #[test]
    fn test_matching_containers_unions_requested_symbols() {
        let index = index_with(&[
            (3, Nucleotide::A, &[1, 5]),
            (3, Nucleotide::C, &[2]),
            (4, Nucleotide::A, &[9]),
        ]);
        let bitmap = index.matching_containers_as_bitmap(3, &[Nucleotide::A, Nucleotide::C]);
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), [1, 2, 5]);
        let only_a = index.matching_containers_as_bitmap(3, &[Nucleotide::A]);
        assert_eq!(only_a.iter().collect::<Vec<_>>(), [1, 5]);
    }

    #[test]
    fn test_rows_split_across_tiles() {
        let rows = [1u32, (1 << 16) + 2, (1 << 16) + 3, (2 << 16)];
        let index = index_with(&[(0, Nucleotide::T, &rows)]);
        let bitmap = index.matching_containers_as_bitmap(0, &[Nucleotide::T]);
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), rows);
    }

    #[test]
    fn test_symbol_counts_subtract_from_reference() {
        let index = index_with(&[(0, Nucleotide::A, &[0, 1]), (0, Nucleotide::Gap, &[2])]);
        let counts = index.symbol_counts_for_position(0, Nucleotide::T, 10);
        assert_eq!(counts[Nucleotide::T], 7);
        assert_eq!(counts[Nucleotide::A], 2);
        assert_eq!(counts[Nucleotide::Gap], 1);
        assert_eq!(counts[Nucleotide::C], 0);
    }

    #[test]
    fn test_adapt_local_reference_rewrites_diffs() {
        // Rows 0..4 covered; rows 1,2,3 hold A, row 0 holds the current
        // reference T. A is more common, so the reference flips.
        let mut index = index_with(&[(0, Nucleotide::A, &[1, 2, 3])]);
        let covered = RoaringBitmap::from_iter([0u32, 1, 2, 3]);
        let new_reference = index.adapt_local_reference(&covered, 0, Nucleotide::T);
        assert_eq!(new_reference, Some(Nucleotide::A));

        // The old reference rows became explicit diffs...
        let t_rows = index.matching_containers_as_bitmap(0, &[Nucleotide::T]);
        assert_eq!(t_rows.iter().collect::<Vec<_>>(), [0]);
        // ...and the new reference has no entries left.
        let a_rows = index.matching_containers_as_bitmap(0, &[Nucleotide::A]);
        assert!(a_rows.is_empty());
    }

    #[test]
    fn test_adapt_keeps_majority_reference() {
        let mut index = index_with(&[(0, Nucleotide::A, &[1])]);
        let covered = RoaringBitmap::from_iter([0u32, 1, 2]);
        assert_eq!(index.adapt_local_reference(&covered, 0, Nucleotide::T), None);
    }

    #[test]
    fn test_overwrite_symbols_places_diffs_by_rank() {
        let index = index_with(&[(1, Nucleotide::G, &[5, 9]), (3, Nucleotide::Gap, &[7])]);
        let filter = RoaringBitmap::from_iter([2u32, 5, 7, 9]);
        let mut sequences = vec![b"AAAA".to_vec(); 4];
        index.overwrite_symbols(&mut sequences, &filter);
        let rendered: Vec<String> = sequences
            .into_iter()
            .map(|seq| String::from_utf8(seq).unwrap())
            .collect();
        assert_eq!(rendered, ["AAAA", "AGAA", "AAA-", "AGAA"]);
    }
}
