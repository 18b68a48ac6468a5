//! The per-partition sequence store: a vertical (position × symbol)
//! diff index, a horizontal coverage index, and an insertion index.

mod coverage_index;
mod insertion_index;
mod vertical_index;

pub use coverage_index::HorizontalCoverageIndex;
pub use insertion_index::InsertionIndex;
pub use vertical_index::{DiffKey, VerticalSequenceIndex};

use std::sync::Arc;

use alphabet::Symbol;
use roaring::RoaringBitmap;

use crate::error::PreprocessingError;

/// Rows are indexed in batches of this size: diffs are buffered and
/// flushed to the vertical index whenever the buffer holds this many
/// rows.
pub const BUFFER_SIZE: u32 = 1024;

/// The shared part of one sequence column: its name and the global
/// reference all partitions align to.
#[derive(Debug)]
pub struct SequenceColumnMetadata<S: Symbol> {
    pub name: String,
    pub reference_sequence: Vec<S>,
}

impl<S: Symbol> SequenceColumnMetadata<S> {
    /// Parse the reference from its character form.
    pub fn new(name: String, reference: &str) -> Result<Self, PreprocessingError> {
        let reference_sequence = parse_symbols::<S>(&name, reference, 0)?;
        Ok(SequenceColumnMetadata {
            name,
            reference_sequence,
        })
    }

    pub fn reference_length(&self) -> usize {
        self.reference_sequence.len()
    }
}

/// One insertion of `contents` between reference positions, attached at
/// the 0-based `position`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub position: u32,
    pub contents: String,
}

impl Insertion {
    /// Parse the `<position>:<symbols>` form used by ingest inputs.
    /// The position is 1-based on the wire.
    pub fn parse<S: Symbol>(sequence: &str, value: &str) -> Result<Self, PreprocessingError> {
        let malformed = || PreprocessingError::MalformedInsertion {
            sequence: sequence.to_string(),
            value: value.to_string(),
        };
        let (position, contents) = value.split_once(':').ok_or_else(malformed)?;
        let position: u32 = position.parse().map_err(|_| malformed())?;
        if position == 0 || contents.is_empty() {
            return Err(malformed());
        }
        for chr in contents.chars() {
            if S::from_char(chr).is_none() {
                return Err(malformed());
            }
        }
        Ok(Insertion {
            position: position - 1,
            contents: contents.to_ascii_uppercase(),
        })
    }
}

/// The rows of one sequence column in one partition.
///
/// Built by appending aligned rows, then finalized exactly once. After
/// finalization the local reference may differ from the global one at
/// positions where another symbol is more common in this partition.
#[derive(Debug)]
pub struct SequenceColumnPartition<S: Symbol> {
    pub metadata: Arc<SequenceColumnMetadata<S>>,
    pub local_reference_sequence: Vec<S>,
    pub vertical_index: VerticalSequenceIndex<S>,
    pub coverage_index: HorizontalCoverageIndex,
    pub insertion_index: InsertionIndex,
    /// Buffered (position, symbol, row) diffs awaiting a flush.
    buffered_diffs: Vec<(u32, S, u32)>,
    buffered_rows: u32,
    /// Coverage start/end deltas, for per-position covered counts.
    coverage_deltas: Vec<i32>,
    /// Missing-symbol occurrences inside covered ranges, per position.
    missing_counts: Vec<u32>,
    finalized: bool,
}

impl<S: Symbol> SequenceColumnPartition<S> {
    pub fn new(metadata: Arc<SequenceColumnMetadata<S>>) -> Self {
        let reference_length = metadata.reference_length();
        SequenceColumnPartition {
            local_reference_sequence: metadata.reference_sequence.clone(),
            metadata,
            vertical_index: VerticalSequenceIndex::new(),
            coverage_index: HorizontalCoverageIndex::new(),
            insertion_index: InsertionIndex::new(),
            buffered_diffs: Vec::new(),
            buffered_rows: 0,
            coverage_deltas: vec![0; reference_length + 1],
            missing_counts: vec![0; reference_length],
            finalized: false,
        }
    }

    pub fn sequence_count(&self) -> u32 {
        self.coverage_index.row_count()
    }

    pub fn local_reference(&self, position: u32) -> S {
        self.local_reference_sequence[position as usize]
    }

    /// Append one aligned row. `sequence` covers the reference
    /// positions `[offset, offset + sequence.len())`.
    pub fn append(
        &mut self,
        sequence: &str,
        offset: u32,
        insertions: &[Insertion],
    ) -> Result<(), PreprocessingError> {
        if self.finalized {
            return Err(PreprocessingError::PartitionFinalized);
        }
        let reference_length = self.metadata.reference_length();
        if offset as usize + sequence.len() > reference_length {
            return Err(PreprocessingError::SequenceTooLong {
                sequence: self.metadata.name.clone(),
                length: sequence.len(),
                offset,
                reference_length,
            });
        }
        for insertion in insertions {
            if insertion.position as usize >= reference_length {
                return Err(PreprocessingError::InsertionOutOfRange {
                    sequence: self.metadata.name.clone(),
                    position: insertion.position,
                });
            }
        }
        let symbols = parse_symbols::<S>(&self.metadata.name, sequence, offset)?;
        let row_id = self.sequence_count();

        let mut first_observed = None;
        let mut last_observed = None;
        let mut missing_positions = Vec::new();
        for (idx, symbol) in symbols.iter().enumerate() {
            let position = offset + idx as u32;
            if *symbol == S::MISSING {
                missing_positions.push(position);
                continue;
            }
            if first_observed.is_none() {
                first_observed = Some(position);
            }
            last_observed = Some(position);
            if *symbol != self.local_reference(position) {
                self.buffered_diffs.push((position, *symbol, row_id));
            }
        }

        match (first_observed, last_observed) {
            (Some(start), Some(end)) => {
                let end = end + 1;
                self.coverage_index
                    .insert_coverage(start, end, &missing_positions);
                self.coverage_deltas[start as usize] += 1;
                self.coverage_deltas[end as usize] -= 1;
                for position in &missing_positions {
                    if (start..end).contains(position) {
                        self.missing_counts[*position as usize] += 1;
                    }
                }
            }
            _ => self.coverage_index.insert_null_row(),
        }

        for insertion in insertions {
            self.insertion_index
                .insert(insertion.position, &insertion.contents, row_id);
        }

        self.buffered_rows += 1;
        if self.buffered_rows >= BUFFER_SIZE {
            self.flush_buffer();
        }
        Ok(())
    }

    /// Append a row whose sequence was not provided at all.
    pub fn append_null(&mut self) -> Result<(), PreprocessingError> {
        if self.finalized {
            return Err(PreprocessingError::PartitionFinalized);
        }
        self.coverage_index.insert_null_row();
        self.buffered_rows += 1;
        if self.buffered_rows >= BUFFER_SIZE {
            self.flush_buffer();
        }
        Ok(())
    }

    fn flush_buffer(&mut self) {
        // Rows arrive in ascending order; a stable sort by (position,
        // symbol) keeps each group's row ids ascending.
        let mut diffs = std::mem::take(&mut self.buffered_diffs);
        diffs.sort_by_key(|(position, symbol, _)| (*position, symbol.index()));
        let mut idx = 0;
        let mut rows = Vec::new();
        while idx < diffs.len() {
            let (position, symbol, _) = diffs[idx];
            rows.clear();
            while idx < diffs.len() && diffs[idx].0 == position && diffs[idx].1 == symbol {
                rows.push(diffs[idx].2);
                idx += 1;
            }
            self.vertical_index.add_symbol_rows(position, symbol, &rows);
        }
        self.buffered_rows = 0;
    }

    /// Number of rows covered at `position`, derived from the coverage
    /// deltas accumulated during ingest.
    fn covered_counts(&self) -> Vec<u32> {
        let mut counts = Vec::with_capacity(self.missing_counts.len());
        let mut running = 0i32;
        for (position, delta) in self.coverage_deltas[..self.missing_counts.len()]
            .iter()
            .enumerate()
        {
            running += delta;
            counts.push(running as u32 - self.missing_counts[position]);
        }
        counts
    }

    /// Reassemble a finalized partition from its persisted parts.
    pub fn from_loaded_parts(
        metadata: Arc<SequenceColumnMetadata<S>>,
        local_reference_sequence: Vec<S>,
        vertical_index: VerticalSequenceIndex<S>,
        coverage_index: HorizontalCoverageIndex,
    ) -> Self {
        let reference_length = metadata.reference_length();
        SequenceColumnPartition {
            metadata,
            local_reference_sequence,
            vertical_index,
            coverage_index,
            insertion_index: InsertionIndex::new(),
            buffered_diffs: Vec::new(),
            buffered_rows: 0,
            coverage_deltas: vec![0; reference_length + 1],
            missing_counts: vec![0; reference_length],
            finalized: true,
        }
    }

    /// Flush pending rows, adapt the local reference to the most common
    /// symbol per position, and compact all index structures. Partitions
    /// are build-once: after the first call the partition is read-only
    /// and further calls are no-ops.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.flush_buffer();

        let covered_counts = self.covered_counts();
        let mut adapted_positions = 0usize;
        for (position, covered_count) in covered_counts.into_iter().enumerate() {
            let position = position as u32;
            let reference_symbol = self.local_reference(position);
            let counts = self.vertical_index.symbol_counts_for_position(
                position,
                reference_symbol,
                covered_count,
            );
            if counts
                .iter()
                .all(|(symbol, count)| symbol == reference_symbol || *count <= counts[reference_symbol])
            {
                continue;
            }
            let covered = self.coverage_index.covered_bitmap(position);
            if let Some(new_reference) = self.vertical_index.adapt_local_reference(
                &covered,
                position,
                reference_symbol,
            ) {
                self.local_reference_sequence[position as usize] = new_reference;
                adapted_positions += 1;
            }
        }

        self.vertical_index.shrink_to_fit();
        self.insertion_index.shrink_to_fit();
        self.finalized = true;

        tracing::debug!(
            sequence = %self.metadata.name,
            rows = self.sequence_count(),
            adapted_positions,
            index_bytes = self.vertical_index.size_in_bytes(),
            coverage_bytes = self.coverage_index.size_in_bytes(),
            "finalized sequence column partition"
        );
    }

    /// The symbol of `row_id` at `position`, resolved through the three
    /// index structures.
    pub fn symbol_at(&self, row_id: u32, position: u32) -> S {
        if !self.coverage_index.is_covered(row_id, position) {
            return S::MISSING;
        }
        self.vertical_index
            .symbol_of_row(position, row_id)
            .unwrap_or_else(|| self.local_reference(position))
    }

    /// Reconstruct the aligned sequences of `row_ids`, in ascending
    /// row-id order: local reference, overwritten with vertical diffs,
    /// then masked by coverage.
    pub fn reconstruct_aligned(&self, row_ids: &RoaringBitmap) -> Vec<String> {
        let reference: Vec<u8> = self
            .local_reference_sequence
            .iter()
            .map(|symbol| symbol.to_char() as u8)
            .collect();
        let mut sequences = vec![reference; row_ids.len() as usize];
        self.vertical_index.overwrite_symbols(&mut sequences, row_ids);
        self.coverage_index
            .overwrite_missing(&mut sequences, row_ids, S::MISSING.to_char() as u8);
        sequences
            .into_iter()
            .map(|sequence| String::from_utf8(sequence).expect("symbols are ASCII"))
            .collect()
    }
}

fn parse_symbols<S: Symbol>(
    sequence_name: &str,
    characters: &str,
    offset: u32,
) -> Result<Vec<S>, PreprocessingError> {
    characters
        .chars()
        .enumerate()
        .map(|(idx, chr)| {
            S::from_char(chr).ok_or_else(|| PreprocessingError::InvalidCharacter {
                sequence: sequence_name.to_string(),
                chr,
                position: offset + idx as u32,
            })
        })
        .collect()
}
