//! Bitmap primitives shared by the storage indexes and the operator
//! runtime.
//!
//! The vertical sequence index keys its bitmaps by v_tile (the high 16
//! bits of a row id) so that one entry lines up with one roaring
//! container. The `roaring` crate does not expose its container
//! internals, so this crate keeps its own 2^16-wide [`Container`] with
//! the same array/bitset representation switch, and assembles query
//! results into a [`RoaringBitmap`] in a single sorted pass.

mod builder;
mod container;
mod subset_ranks;

pub use builder::{BitmapBuilderByContainer, BitmapBuilderByRange};
pub use container::{Container, ARRAY_CONTAINER_MAX_SIZE};
pub use subset_ranks::subset_ranks;

use roaring::RoaringBitmap;

/// The number of values one container / v_tile spans.
pub const CONTAINER_SIZE: u32 = 1 << 16;

/// The v_tile (high 16 bits) of a row id.
#[inline]
pub fn v_tile_of(row_id: u32) -> u16 {
    (row_id >> 16) as u16
}

/// The offset of a row id within its v_tile (low 16 bits).
#[inline]
pub fn low_bits_of(row_id: u32) -> u16 {
    (row_id & 0xFFFF) as u16
}

/// `[0, row_count)` as a bitmap.
pub fn full_bitmap(row_count: u32) -> RoaringBitmap {
    let mut bitmap = RoaringBitmap::new();
    bitmap.insert_range(0..row_count);
    bitmap
}

/// In-place complement with respect to `[0, row_count)`.
pub fn flip_bitmap(bitmap: &mut RoaringBitmap, row_count: u32) {
    let mut full = full_bitmap(row_count);
    full -= &*bitmap;
    *bitmap = full;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tile_split_round_trips() {
        for row_id in [0u32, 1, 0xFFFF, 0x10000, 0x12345678, u32::MAX] {
            let rebuilt = ((v_tile_of(row_id) as u32) << 16) | low_bits_of(row_id) as u32;
            assert_eq!(rebuilt, row_id);
        }
    }

    #[test]
    fn test_flip_bitmap_is_an_involution() {
        let mut bitmap = RoaringBitmap::from_iter([1u32, 5, 9]);
        let original = bitmap.clone();
        flip_bitmap(&mut bitmap, 12);
        assert_eq!(bitmap.len(), 9);
        assert!(!bitmap.contains(5));
        flip_bitmap(&mut bitmap, 12);
        assert_eq!(bitmap, original);
    }
}
