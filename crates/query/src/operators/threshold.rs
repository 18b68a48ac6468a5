//! The three interchangeable evaluation strategies of the N-Of
//! operator. All take the already materialized child bitmaps (negated
//! children arrive pre-complemented) and must produce identical
//! results.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use roaring::RoaringBitmap;
use roaring_util::full_bitmap;

/// Which strategy `Threshold` evaluates with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThresholdImpl {
    /// Counting array over row ids.
    Counting,
    /// Dynamic programming with n+1 accumulator bitmaps.
    #[default]
    Dp,
    /// N-way heap merge over the sorted child iterators.
    HeapMerge,
}

pub fn evaluate(
    strategy: ThresholdImpl,
    children: &[RoaringBitmap],
    n: u32,
    match_exactly: bool,
    row_count: u32,
) -> RoaringBitmap {
    // Zero-threshold degenerates: "at least 0" is everything, "exactly
    // 0" is the rows in no child at all.
    if n == 0 {
        if !match_exactly {
            return full_bitmap(row_count);
        }
        let mut result = full_bitmap(row_count);
        for child in children {
            result -= child;
        }
        return result;
    }
    match strategy {
        ThresholdImpl::Counting => counting(children, n, match_exactly, row_count),
        ThresholdImpl::Dp => dp(children, n, match_exactly, row_count),
        ThresholdImpl::HeapMerge => heap_merge(children, n, match_exactly),
    }
}

fn counting(
    children: &[RoaringBitmap],
    n: u32,
    match_exactly: bool,
    row_count: u32,
) -> RoaringBitmap {
    let mut counts = vec![0u32; row_count as usize];
    for child in children {
        for row_id in child.iter() {
            counts[row_id as usize] += 1;
        }
    }
    let mut result = RoaringBitmap::new();
    for (row_id, count) in counts.into_iter().enumerate() {
        let hit = if match_exactly { count == n } else { count >= n };
        if hit {
            result.push(row_id as u32);
        }
    }
    result
}

fn dp(children: &[RoaringBitmap], n: u32, match_exactly: bool, _row_count: u32) -> RoaringBitmap {
    // acc[j] holds the rows appearing in at least j children so far.
    // For an exact match one extra accumulator separates "exactly n"
    // from "more than n".
    let accumulators = if match_exactly { n + 1 } else { n } as usize;
    let mut acc: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); accumulators];
    for child in children {
        for j in (1..accumulators).rev() {
            let promoted = &acc[j - 1] & child;
            acc[j] |= promoted;
        }
        acc[0] |= child;
    }
    if match_exactly {
        let mut result = std::mem::take(&mut acc[n as usize - 1]);
        result -= &acc[n as usize];
        result
    } else {
        std::mem::take(&mut acc[n as usize - 1])
    }
}

fn heap_merge(children: &[RoaringBitmap], n: u32, match_exactly: bool) -> RoaringBitmap {
    let mut iterators: Vec<_> = children.iter().map(|child| child.iter()).collect();
    let mut heap: BinaryHeap<Reverse<(u32, usize)>> = BinaryHeap::new();
    for (idx, iterator) in iterators.iter_mut().enumerate() {
        if let Some(row_id) = iterator.next() {
            heap.push(Reverse((row_id, idx)));
        }
    }

    let mut result = RoaringBitmap::new();
    while let Some(Reverse((row_id, idx))) = heap.pop() {
        let mut count = 1u32;
        if let Some(next) = iterators[idx].next() {
            heap.push(Reverse((next, idx)));
        }
        while let Some(Reverse((other_row, other_idx))) = heap.peek().copied() {
            if other_row != row_id {
                break;
            }
            heap.pop();
            count += 1;
            if let Some(next) = iterators[other_idx].next() {
                heap.push(Reverse((next, other_idx)));
            }
        }
        let hit = if match_exactly { count == n } else { count >= n };
        if hit {
            result.push(row_id);
        }
    }
    result
}
