//! The lazy bitmap operator runtime. A compiled filter is a tree of
//! [`Operator`]s; `evaluate` walks it bottom-up and returns the row-id
//! bitmap of one partition.

mod result;
mod selection;
mod threshold;

pub use result::OperatorResult;
pub use selection::{Comparator, Predicate};
pub use threshold::ThresholdImpl;

use roaring::RoaringBitmap;
use roaring_util::{flip_bitmap, full_bitmap};
use storage::column::HorizontalCoverageIndex;

/// Whether a coverage test keeps the covered or the uncovered rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverageComparator {
    Covered,
    NotCovered,
}

/// One node of a compiled filter plan. Borrows the partition's stored
/// bitmaps and column values for the duration of the query.
pub enum Operator<'a> {
    Empty {
        row_count: u32,
    },
    Full {
        row_count: u32,
    },
    /// A precomputed or stored bitmap, returned without copying.
    IndexScan {
        bitmap: OperatorResult<'a>,
        row_count: u32,
    },
    /// Defers bitmap construction to evaluation time; used for
    /// predicates that scan auxiliary structures.
    BitmapProducer {
        producer: Box<dyn Fn() -> RoaringBitmap + Send + Sync + 'a>,
        row_count: u32,
    },
    Complement {
        child: Box<Operator<'a>>,
        row_count: u32,
    },
    /// `(⋂ children) \ (⋃ negated_children)`.
    Intersection {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        row_count: u32,
    },
    Union {
        children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// Rows appearing in at least (or exactly) `n` of
    /// `children ∪ complement(negated_children)`.
    Threshold {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        n: u32,
        match_exactly: bool,
        strategy: ThresholdImpl,
        row_count: u32,
    },
    /// Rows of `child` (or of the full range) matching every predicate.
    Selection {
        child: Option<Box<Operator<'a>>>,
        predicates: Vec<Predicate<'a>>,
        row_count: u32,
    },
    /// Rows covered (or not covered) at one position.
    IsInCoveredRegion {
        coverage: &'a HorizontalCoverageIndex,
        comparator: CoverageComparator,
        position: u32,
        row_count: u32,
    },
}

impl std::fmt::Debug for Operator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Empty { .. } => write!(f, "Empty"),
            Operator::Full { .. } => write!(f, "Full"),
            Operator::IndexScan { bitmap, .. } => {
                write!(f, "IndexScan({})", bitmap.cardinality())
            }
            Operator::BitmapProducer { .. } => write!(f, "BitmapProducer"),
            Operator::Complement { child, .. } => write!(f, "Complement({child:?})"),
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => write!(f, "Intersection({children:?} \\ {negated_children:?})"),
            Operator::Union { children, .. } => write!(f, "Union({children:?})"),
            Operator::Threshold {
                children,
                negated_children,
                n,
                match_exactly,
                ..
            } => write!(
                f,
                "Threshold[{}{n}]({children:?}, neg {negated_children:?})",
                if *match_exactly { "=" } else { ">=" }
            ),
            Operator::Selection {
                child, predicates, ..
            } => write!(f, "Selection({child:?}, {} predicates)", predicates.len()),
            Operator::IsInCoveredRegion {
                comparator,
                position,
                ..
            } => write!(f, "IsInCoveredRegion({comparator:?}, {position})"),
        }
    }
}

impl<'a> Operator<'a> {
    pub fn row_count(&self) -> u32 {
        match self {
            Operator::Empty { row_count }
            | Operator::Full { row_count }
            | Operator::IndexScan { row_count, .. }
            | Operator::BitmapProducer { row_count, .. }
            | Operator::Complement { row_count, .. }
            | Operator::Intersection { row_count, .. }
            | Operator::Union { row_count, .. }
            | Operator::Threshold { row_count, .. }
            | Operator::Selection { row_count, .. }
            | Operator::IsInCoveredRegion { row_count, .. } => *row_count,
        }
    }

    /// Evaluate the subtree into a row-id bitmap.
    pub fn evaluate(&self) -> OperatorResult<'_> {
        match self {
            Operator::Empty { .. } => OperatorResult::Owned(RoaringBitmap::new()),
            Operator::Full { row_count } => OperatorResult::Owned(full_bitmap(*row_count)),
            Operator::IndexScan { bitmap, .. } => OperatorResult::Borrowed(bitmap.as_ref()),
            Operator::BitmapProducer { producer, .. } => OperatorResult::Owned(producer()),
            Operator::Complement { child, row_count } => {
                let mut bitmap = child.evaluate().into_bitmap();
                flip_bitmap(&mut bitmap, *row_count);
                OperatorResult::Owned(bitmap)
            }
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => evaluate_intersection(children, negated_children, *row_count),
            Operator::Union { children, .. } => {
                use roaring::MultiOps;
                let results: Vec<OperatorResult> =
                    children.iter().map(|child| child.evaluate()).collect();
                OperatorResult::Owned(results.iter().map(|result| result.as_ref()).union())
            }
            Operator::Threshold {
                children,
                negated_children,
                n,
                match_exactly,
                strategy,
                row_count,
            } => {
                // Negated children participate as their complements.
                let mut bitmaps: Vec<RoaringBitmap> = children
                    .iter()
                    .map(|child| child.evaluate().into_bitmap())
                    .collect();
                for child in negated_children {
                    let mut bitmap = child.evaluate().into_bitmap();
                    flip_bitmap(&mut bitmap, *row_count);
                    bitmaps.push(bitmap);
                }
                OperatorResult::Owned(threshold::evaluate(
                    *strategy,
                    &bitmaps,
                    *n,
                    *match_exactly,
                    *row_count,
                ))
            }
            Operator::Selection {
                child,
                predicates,
                row_count,
            } => {
                let matches = |row_id: u32| {
                    predicates
                        .iter()
                        .all(|predicate| predicate.matches(row_id))
                };
                let bitmap = match child {
                    Some(child) => child
                        .evaluate()
                        .as_ref()
                        .iter()
                        .filter(|row_id| matches(*row_id))
                        .collect(),
                    None => (0..*row_count).filter(|row_id| matches(*row_id)).collect(),
                };
                OperatorResult::Owned(bitmap)
            }
            Operator::IsInCoveredRegion {
                coverage,
                comparator,
                position,
                ..
            } => OperatorResult::Owned(match comparator {
                CoverageComparator::Covered => coverage.covered_bitmap(*position),
                CoverageComparator::NotCovered => coverage.not_covered_bitmap(*position),
            }),
        }
    }

    /// The negation of this subtree, avoiding a `Complement` wrapper
    /// where a cheaper algebraic form exists.
    pub fn negate(self) -> Operator<'a> {
        let row_count = self.row_count();
        match self {
            Operator::Empty { .. } => Operator::Full { row_count },
            Operator::Full { .. } => Operator::Empty { row_count },
            Operator::Complement { child, .. } => *child,
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => {
                // De Morgan: ¬(⋂ c \ ⋃ n) = ⋃ ¬c ∪ ⋃ n.
                let mut union_children: Vec<Operator<'a>> =
                    children.into_iter().map(|child| child.negate()).collect();
                union_children.extend(negated_children);
                Operator::Union {
                    children: union_children,
                    row_count,
                }
            }
            Operator::Union { children, .. } => {
                // De Morgan: ¬(⋃ c) = ⋂ ¬c, expressed as an intersection
                // with only negated children.
                Operator::Intersection {
                    children: Vec::new(),
                    negated_children: children,
                    row_count,
                }
            }
            Operator::Selection {
                child,
                mut predicates,
                ..
            } if child.is_none() && predicates.len() == 1 => {
                predicates[0].invert();
                Operator::Selection {
                    child: None,
                    predicates,
                    row_count,
                }
            }
            Operator::IsInCoveredRegion {
                coverage,
                comparator,
                position,
                ..
            } => Operator::IsInCoveredRegion {
                coverage,
                comparator: match comparator {
                    CoverageComparator::Covered => CoverageComparator::NotCovered,
                    CoverageComparator::NotCovered => CoverageComparator::Covered,
                },
                position,
                row_count,
            },
            other => Operator::Complement {
                child: Box::new(other),
                row_count,
            },
        }
    }
}

fn evaluate_intersection<'a, 's>(
    children: &'s [Operator<'a>],
    negated_children: &'s [Operator<'a>],
    row_count: u32,
) -> OperatorResult<'s> {
    let mut negated_results: Vec<OperatorResult> = negated_children
        .iter()
        .map(|child| child.evaluate())
        .collect();

    if children.is_empty() {
        // Pure negation: complement of the union of the negated children.
        use roaring::MultiOps;
        let mut bitmap = negated_results.iter().map(|result| result.as_ref()).union();
        flip_bitmap(&mut bitmap, row_count);
        return OperatorResult::Owned(bitmap);
    }

    let mut results: Vec<OperatorResult> =
        children.iter().map(|child| child.evaluate()).collect();
    // Smallest first keeps the intermediate result small.
    results.sort_by_key(|result| result.cardinality());

    let mut iterator = results.into_iter();
    let mut accumulator = iterator
        .next()
        .expect("children is non-empty")
        .into_bitmap();
    for result in iterator {
        accumulator &= result.as_ref();
        if accumulator.is_empty() {
            break;
        }
    }

    // Largest negated child first removes the most rows earliest.
    negated_results.sort_by_key(|result| std::cmp::Reverse(result.cardinality()));
    for result in negated_results {
        if accumulator.is_empty() {
            break;
        }
        accumulator -= result.as_ref();
    }
    OperatorResult::Owned(accumulator)
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan(rows: &[u32], row_count: u32) -> Operator<'static> {
        Operator::IndexScan {
            bitmap: OperatorResult::Owned(rows.iter().copied().collect()),
            row_count,
        }
    }

    fn rows(operator: &Operator) -> Vec<u32> {
        operator.evaluate().as_ref().iter().collect()
    }

    #[test]
    fn test_empty_and_full() {
        assert!(rows(&Operator::Empty { row_count: 4 }).is_empty());
        assert_eq!(rows(&Operator::Full { row_count: 4 }), [0, 1, 2, 3]);
    }

    #[test]
    fn test_index_scan_returns_borrowed() {
        let operator = scan(&[1, 3], 4);
        assert!(!operator.evaluate().is_owned());
        assert_eq!(rows(&operator), [1, 3]);
    }

    #[test]
    fn test_complement() {
        let operator = Operator::Complement {
            child: Box::new(scan(&[1, 3], 4)),
            row_count: 4,
        };
        assert_eq!(rows(&operator), [0, 2]);
    }

    #[test]
    fn test_intersection_with_negated_children() {
        let operator = Operator::Intersection {
            children: vec![scan(&[0, 1, 2, 3], 5), scan(&[1, 2, 3], 5)],
            negated_children: vec![scan(&[2], 5)],
            row_count: 5,
        };
        assert_eq!(rows(&operator), [1, 3]);
    }

    #[test]
    fn test_intersection_of_only_negated_children() {
        let operator = Operator::Intersection {
            children: vec![],
            negated_children: vec![scan(&[0], 4), scan(&[2], 4)],
            row_count: 4,
        };
        assert_eq!(rows(&operator), [1, 3]);
    }

    #[test]
    fn test_union() {
        let operator = Operator::Union {
            children: vec![scan(&[0], 4), scan(&[2, 3], 4)],
            row_count: 4,
        };
        assert_eq!(rows(&operator), [0, 2, 3]);
    }

    #[test]
    fn test_negation_round_trip_equals_original() {
        let operators: Vec<Operator> = vec![
            Operator::Empty { row_count: 6 },
            Operator::Full { row_count: 6 },
            scan(&[1, 4], 6),
            Operator::Complement {
                child: Box::new(scan(&[2], 6)),
                row_count: 6,
            },
            Operator::Union {
                children: vec![scan(&[0], 6), scan(&[5], 6)],
                row_count: 6,
            },
            Operator::Intersection {
                children: vec![scan(&[0, 1, 2], 6)],
                negated_children: vec![scan(&[1], 6)],
                row_count: 6,
            },
            Operator::Threshold {
                children: vec![scan(&[0, 1], 6), scan(&[1, 2], 6)],
                negated_children: vec![],
                n: 2,
                match_exactly: false,
                strategy: ThresholdImpl::default(),
                row_count: 6,
            },
        ];
        for operator in operators {
            let expected = rows(&operator);
            let round_tripped = operator.negate().negate();
            assert_eq!(rows(&round_tripped), expected);
        }
    }

    #[test]
    fn test_de_morgan_on_union() {
        let union = Operator::Union {
            children: vec![scan(&[0, 1], 4), scan(&[1, 2], 4)],
            row_count: 4,
        };
        assert_eq!(rows(&union.negate()), [3]);
    }

    #[test]
    fn test_negated_results_are_subsets_of_row_range() {
        let operator = Operator::Threshold {
            children: vec![scan(&[0, 2], 3), scan(&[2], 3)],
            negated_children: vec![scan(&[1], 3)],
            n: 2,
            match_exactly: false,
            strategy: ThresholdImpl::default(),
            row_count: 3,
        };
        for bitmap in [rows(&operator), rows(&operator.negate())] {
            assert!(bitmap.iter().all(|row_id| *row_id < 3));
        }
    }
}
