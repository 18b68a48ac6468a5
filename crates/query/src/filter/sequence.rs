//! Compilation of the symbol, mutation and insertion filters against a
//! sequence column partition.

use alphabet::Symbol;
use roaring::RoaringBitmap;
use storage::column::SequenceColumnPartition;
use storage::{Table, TablePartition};

use crate::error::check_query;
use crate::operators::{CoverageComparator, Operator, OperatorResult};
use crate::{AmbiguityMode, QueryError};

enum ResolvedSequence<'a> {
    Nucleotide(&'a SequenceColumnPartition<alphabet::Nucleotide>),
    AminoAcid(&'a SequenceColumnPartition<alphabet::AminoAcid>),
}

fn resolve_sequence<'a>(
    table: &Table,
    partition: &'a TablePartition,
    sequence_name: Option<&str>,
) -> Result<ResolvedSequence<'a>, QueryError> {
    let name = match sequence_name {
        Some(name) => name,
        None => table
            .schema
            .default_nucleotide_sequence
            .as_deref()
            .or(table.schema.default_amino_acid_sequence.as_deref())
            .ok_or_else(|| {
                QueryError::bad_request(
                    "The database has no default sequence; provide the sequenceName field",
                )
            })?,
    };
    if let Some(store) = partition.columns.nucleotide_sequence(name) {
        return Ok(ResolvedSequence::Nucleotide(store));
    }
    if let Some(store) = partition.columns.amino_acid_sequence(name) {
        return Ok(ResolvedSequence::AminoAcid(store));
    }
    Err(QueryError::bad_request(format!(
        "Unknown sequence name {name}"
    )))
}

/// Convert the 1-based JSON position to the internal 0-based one,
/// bounds-checked against the reference.
fn checked_position<S: Symbol>(
    store: &SequenceColumnPartition<S>,
    position: u32,
) -> Result<u32, QueryError> {
    check_query!(
        position >= 1,
        "The field 'position' must be a positive 1-based index"
    );
    let reference_length = store.metadata.reference_length() as u32;
    check_query!(
        position <= reference_length,
        "Position {position} is out of bounds for sequence {} of length {reference_length}",
        store.metadata.name
    );
    Ok(position - 1)
}

fn parse_symbol<S: Symbol>(
    store: &SequenceColumnPartition<S>,
    position_idx: u32,
    symbol: &str,
) -> Result<S, QueryError> {
    let mut chars = symbol.chars();
    let (chr, rest) = (chars.next(), chars.next());
    check_query!(
        chr.is_some() && rest.is_none(),
        "The field 'symbol' must be a single character, got {symbol:?}"
    );
    let chr = chr.expect("checked above");
    // `.` refers to the global reference at this position.
    if chr == '.' {
        return Ok(store.metadata.reference_sequence[position_idx as usize]);
    }
    S::from_char(chr).ok_or_else(|| {
        QueryError::bad_request(format!("{chr:?} is not a {} symbol", S::NAME))
    })
}

/// Stored symbols that could resolve to `symbol`.
fn upper_bound_set<S: Symbol>(symbol: S) -> Vec<S> {
    S::SYMBOLS
        .iter()
        .copied()
        .filter(|stored| *stored == symbol || stored.ambiguity_expansion().contains(&symbol))
        .collect()
}

/// Whether every resolution of `stored` lies within the resolutions of
/// one of `symbols`.
fn certainly_in_set<S: Symbol>(stored: S, symbols: &[S]) -> bool {
    let allowed = |candidate: S| {
        symbols.iter().any(|symbol| {
            candidate == *symbol || symbol.ambiguity_expansion().contains(&candidate)
        })
    };
    allowed(stored) && stored.ambiguity_expansion().iter().all(|s| allowed(*s))
}

fn negate_symbols<S: Symbol>(symbols: &[S]) -> Vec<S> {
    S::SYMBOLS
        .iter()
        .copied()
        .filter(|symbol| !symbols.contains(symbol))
        .collect()
}

/// The four-case compilation of "symbol at `position_idx` is in
/// `symbols`", keyed on whether the set contains the partition's local
/// reference and the missing symbol.
fn compile_set<'a, S: Symbol>(
    store: &'a SequenceColumnPartition<S>,
    position_idx: u32,
    symbols: &[S],
    row_count: u32,
) -> Operator<'a> {
    let local_reference = store.local_reference(position_idx);
    let includes_reference = symbols.contains(&local_reference);
    let includes_missing = symbols.contains(&S::MISSING);

    let index_scan = |bitmap: RoaringBitmap| Operator::IndexScan {
        bitmap: OperatorResult::Owned(bitmap),
        row_count,
    };
    let coverage = |comparator| Operator::IsInCoveredRegion {
        coverage: &store.coverage_index,
        comparator,
        position: position_idx,
        row_count,
    };

    if includes_reference && includes_missing {
        // Everything except the explicitly excluded symbols.
        let negated = negate_symbols::<S>(symbols);
        let bitmap = store
            .vertical_index
            .matching_containers_as_bitmap(position_idx, &negated);
        return Operator::Complement {
            child: Box::new(index_scan(bitmap)),
            row_count,
        };
    }
    if includes_missing {
        // Uncovered rows plus the explicitly indexed mutation symbols.
        let bitmap = store
            .vertical_index
            .matching_containers_as_bitmap(position_idx, symbols);
        return Operator::Union {
            children: vec![coverage(CoverageComparator::NotCovered), index_scan(bitmap)],
            row_count,
        };
    }
    if includes_reference {
        // Covered rows minus the excluded mutation symbols. The missing
        // symbol never appears in the vertical index; coverage already
        // excludes it.
        let mut negated = negate_symbols::<S>(symbols);
        negated.retain(|symbol| *symbol != S::MISSING);
        let bitmap = store
            .vertical_index
            .matching_containers_as_bitmap(position_idx, &negated);
        return Operator::Intersection {
            children: vec![coverage(CoverageComparator::Covered)],
            negated_children: vec![index_scan(bitmap)],
            row_count,
        };
    }
    // Entirely served by the vertical index.
    let bitmap = store
        .vertical_index
        .matching_containers_as_bitmap(position_idx, symbols);
    index_scan(bitmap)
}

/// Apply the ambiguity mode to a raw symbol set, returning the operator.
fn compile_set_with_mode<'a, S: Symbol>(
    store: &'a SequenceColumnPartition<S>,
    position_idx: u32,
    symbols: &[S],
    mode: AmbiguityMode,
    row_count: u32,
) -> Operator<'a> {
    match mode {
        AmbiguityMode::None => compile_set(store, position_idx, symbols, row_count),
        AmbiguityMode::UpperBound => {
            let mut expanded: Vec<S> = S::SYMBOLS
                .iter()
                .copied()
                .filter(|stored| {
                    symbols
                        .iter()
                        .any(|symbol| upper_bound_set(*symbol).contains(stored))
                })
                .collect();
            expanded.extend(symbols.iter().copied());
            expanded.sort();
            expanded.dedup();
            compile_set(store, position_idx, &expanded, row_count)
        }
        AmbiguityMode::LowerBound => {
            // Rows that might be something else: NOT(in any non-certain
            // symbol).
            let excluded: Vec<S> = S::SYMBOLS
                .iter()
                .copied()
                .filter(|stored| !certainly_in_set(*stored, symbols))
                .collect();
            compile_set(store, position_idx, &excluded, row_count).negate()
        }
    }
}

pub fn compile_symbol_equals<'a>(
    table: &'a Table,
    partition: &'a TablePartition,
    sequence_name: Option<&str>,
    position: u32,
    symbol: &str,
    mode: AmbiguityMode,
) -> Result<Operator<'a>, QueryError> {
    let row_count = partition.sequence_count;
    match resolve_sequence(table, partition, sequence_name)? {
        ResolvedSequence::Nucleotide(store) => {
            let position_idx = checked_position(store, position)?;
            let symbol = parse_symbol(store, position_idx, symbol)?;
            Ok(compile_set_with_mode(store, position_idx, &[symbol], mode, row_count))
        }
        ResolvedSequence::AminoAcid(store) => {
            let position_idx = checked_position(store, position)?;
            let symbol = parse_symbol(store, position_idx, symbol)?;
            Ok(compile_set_with_mode(store, position_idx, &[symbol], mode, row_count))
        }
    }
}

pub fn compile_symbol_in_set<'a>(
    table: &'a Table,
    partition: &'a TablePartition,
    sequence_name: Option<&str>,
    position: u32,
    symbols: &[String],
    mode: AmbiguityMode,
) -> Result<Operator<'a>, QueryError> {
    check_query!(
        !symbols.is_empty(),
        "The field 'symbols' must contain at least one symbol"
    );
    let row_count = partition.sequence_count;
    match resolve_sequence(table, partition, sequence_name)? {
        ResolvedSequence::Nucleotide(store) => {
            let position_idx = checked_position(store, position)?;
            let symbols = symbols
                .iter()
                .map(|symbol| parse_symbol(store, position_idx, symbol))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(compile_set_with_mode(store, position_idx, &symbols, mode, row_count))
        }
        ResolvedSequence::AminoAcid(store) => {
            let position_idx = checked_position(store, position)?;
            let symbols = symbols
                .iter()
                .map(|symbol| parse_symbol(store, position_idx, symbol))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(compile_set_with_mode(store, position_idx, &symbols, mode, row_count))
        }
    }
}

pub fn compile_has_mutation<'a>(
    table: &'a Table,
    partition: &'a TablePartition,
    sequence_name: Option<&str>,
    position: u32,
    mode: AmbiguityMode,
) -> Result<Operator<'a>, QueryError> {
    let row_count = partition.sequence_count;
    // "Differs from the global reference": the negation of equality,
    // with the ambiguity bound flipped through it.
    match resolve_sequence(table, partition, sequence_name)? {
        ResolvedSequence::Nucleotide(store) => {
            let position_idx = checked_position(store, position)?;
            let reference = store.metadata.reference_sequence[position_idx as usize];
            Ok(
                compile_set_with_mode(store, position_idx, &[reference], mode.flip(), row_count)
                    .negate(),
            )
        }
        ResolvedSequence::AminoAcid(store) => {
            let position_idx = checked_position(store, position)?;
            let reference = store.metadata.reference_sequence[position_idx as usize];
            Ok(
                compile_set_with_mode(store, position_idx, &[reference], mode.flip(), row_count)
                    .negate(),
            )
        }
    }
}

pub fn compile_has_insertion<'a>(
    table: &'a Table,
    partition: &'a TablePartition,
    sequence_name: Option<&str>,
    position: u32,
    pattern: &str,
) -> Result<Operator<'a>, QueryError> {
    let row_count = partition.sequence_count;
    match resolve_sequence(table, partition, sequence_name)? {
        ResolvedSequence::Nucleotide(store) => {
            compile_insertion(store, position, pattern, row_count)
        }
        ResolvedSequence::AminoAcid(store) => {
            compile_insertion(store, position, pattern, row_count)
        }
    }
}

fn compile_insertion<'a, S: Symbol>(
    store: &'a SequenceColumnPartition<S>,
    position: u32,
    pattern: &str,
    row_count: u32,
) -> Result<Operator<'a>, QueryError> {
    let position_idx = checked_position(store, position)?;
    check_query!(!pattern.is_empty(), "The field 'pattern' must not be empty");

    let is_regex = pattern.contains(['.', '*']);
    if !is_regex {
        for chr in pattern.chars() {
            check_query!(
                S::from_char(chr).is_some(),
                "{chr:?} in the insertion pattern is not a {} symbol",
                S::NAME
            );
        }
        let bitmap = store.insertion_index.bitmap_for(position_idx, pattern);
        return Ok(match bitmap {
            Some(bitmap) => Operator::IndexScan {
                bitmap: OperatorResult::Borrowed(bitmap),
                row_count,
            },
            None => Operator::Empty { row_count },
        });
    }

    // Anchored pattern over symbol literals, `.` and `.*`.
    let mut regex_source = String::with_capacity(pattern.len() + 2);
    regex_source.push('^');
    for chr in pattern.chars() {
        match chr {
            '.' | '*' => regex_source.push(chr),
            chr if S::from_char(chr).is_some() => {
                regex_source.push(chr.to_ascii_uppercase());
            }
            chr => {
                return Err(QueryError::bad_request(format!(
                    "{chr:?} in the insertion pattern is not a {} symbol",
                    S::NAME
                )))
            }
        }
    }
    regex_source.push('$');
    let regex = regex::Regex::new(&regex_source).map_err(|error| {
        QueryError::bad_request(format!("Cannot compile insertion pattern: {error}"))
    })?;

    Ok(Operator::BitmapProducer {
        producer: Box::new(move || {
            store
                .insertion_index
                .search(position_idx, |literal| regex.is_match(literal))
        }),
        row_count,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use alphabet::Nucleotide;

    #[test]
    fn test_upper_bound_set_of_concrete_symbol() {
        let set = upper_bound_set(Nucleotide::A);
        // Every ambiguity code that may stand for A, plus A and N.
        let expected = [
            Nucleotide::A,
            Nucleotide::R,
            Nucleotide::W,
            Nucleotide::M,
            Nucleotide::D,
            Nucleotide::H,
            Nucleotide::V,
            Nucleotide::N,
        ];
        assert_eq!(set.len(), expected.len());
        for symbol in expected {
            assert!(set.contains(&symbol), "{symbol:?} missing from {set:?}");
        }
    }

    #[test]
    fn test_upper_bound_set_of_ambiguity_code() {
        let set = upper_bound_set(Nucleotide::R);
        assert!(set.contains(&Nucleotide::R));
        assert!(set.contains(&Nucleotide::N));
        assert!(!set.contains(&Nucleotide::A), "A itself cannot read as R");
    }

    #[test]
    fn test_certainly_in_set() {
        // A stored A is certainly within R = {A, G}.
        assert!(certainly_in_set(Nucleotide::A, &[Nucleotide::R]));
        assert!(certainly_in_set(Nucleotide::R, &[Nucleotide::R]));
        // A stored W = {A, T} is not certainly within R.
        assert!(!certainly_in_set(Nucleotide::W, &[Nucleotide::R]));
        // A stored N could be anything.
        assert!(!certainly_in_set(Nucleotide::N, &[Nucleotide::R]));
    }

    #[test]
    fn test_negate_symbols() {
        let negated = negate_symbols::<Nucleotide>(&[Nucleotide::A, Nucleotide::C]);
        assert_eq!(negated.len(), Nucleotide::COUNT - 2);
        assert!(!negated.contains(&Nucleotide::A));
        assert!(negated.contains(&Nucleotide::N));
    }
}
