use crate::Container;

/// Ranks, with respect to `filter`, of the elements of
/// `filter ∩ subset`. Ranks are 1-based.
///
/// ```text
///   filter  subset   rank in filter
///     3
///     4 ---- 4   -->  2
///     5 ---- 5   -->  3
///            6
///     7
///     9 ---- 9   -->  5
/// ```
///
/// Used by sequence reconstruction: `filter` is one container of the
/// row-id filter, `subset` one vertical-index container, and the rank
/// locates the output slot of each affected sequence.
pub fn subset_ranks(filter: &Container, subset: &Container) -> Vec<u32> {
    let mut ranks = Vec::new();
    let mut rank = 0u32;
    for value in filter.iter() {
        rank += 1;
        if subset.contains(value) {
            ranks.push(rank);
        }
    }
    ranks
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_documented_example() {
        let filter: Container = [3u16, 4, 5, 7, 9].iter().copied().collect();
        let subset: Container = [4u16, 5, 6, 9].iter().copied().collect();
        assert_eq!(subset_ranks(&filter, &subset), vec![2, 3, 5]);
    }

    #[test]
    fn test_disjoint_containers_yield_no_ranks() {
        let filter: Container = [1u16, 2].iter().copied().collect();
        let subset: Container = [3u16, 4].iter().copied().collect();
        assert!(subset_ranks(&filter, &subset).is_empty());
    }

    #[test]
    fn test_identical_containers_yield_consecutive_ranks() {
        let filter: Container = [10u16, 20, 30].iter().copied().collect();
        assert_eq!(subset_ranks(&filter, &filter), vec![1, 2, 3]);
    }

    #[test]
    fn test_ranks_against_bitset_filter() {
        let mut filter = Container::with_capacity(5000);
        for value in 0..5000u16 {
            filter.push_sorted(value);
        }
        let subset: Container = [0u16, 4999].iter().copied().collect();
        assert_eq!(subset_ranks(&filter, &subset), vec![1, 5000]);
    }

    #[quickcheck_macros::quickcheck]
    fn prop_ranks_match_a_naive_scan(filter: Vec<u16>, subset: Vec<u16>) -> bool {
        let mut filter = filter;
        filter.sort_unstable();
        filter.dedup();
        let mut subset = subset;
        subset.sort_unstable();
        subset.dedup();

        let filter_container: Container = filter.iter().copied().collect();
        let subset_container: Container = subset.iter().copied().collect();

        let expected: Vec<u32> = filter
            .iter()
            .enumerate()
            .filter(|(_, value)| subset.binary_search(value).is_ok())
            .map(|(idx, _)| idx as u32 + 1)
            .collect();
        subset_ranks(&filter_container, &subset_container) == expected
    }
}
