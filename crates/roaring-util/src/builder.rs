use roaring::RoaringBitmap;

use crate::container::{Container, BITSET_WORDS};

/// Assembles a [`RoaringBitmap`] from per-v_tile containers in one
/// linear pass. Tiles must be fed in ascending order; containers of the
/// same tile are unioned before the tile is flushed.
#[derive(Default)]
pub struct BitmapBuilderByContainer {
    result: RoaringBitmap,
    current_tile: Option<u16>,
    // Containers accumulated for the current tile. The common case is
    // exactly one, in which case no dense union is materialized.
    pending: Vec<Container>,
}

impl BitmapBuilderByContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one container of values for `v_tile`. `v_tile` must be
    /// greater than or equal to every previously added tile.
    pub fn add_container(&mut self, v_tile: u16, container: &Container) {
        if container.is_empty() {
            return;
        }
        match self.current_tile {
            Some(current) if current == v_tile => {
                self.pending.push(container.clone());
            }
            Some(current) => {
                debug_assert!(current < v_tile, "tiles must be added in ascending order");
                self.flush_tile(current);
                self.current_tile = Some(v_tile);
                self.pending.push(container.clone());
            }
            None => {
                self.current_tile = Some(v_tile);
                self.pending.push(container.clone());
            }
        }
    }

    fn flush_tile(&mut self, tile: u16) {
        let base = (tile as u32) << 16;
        if self.pending.len() == 1 {
            let container = self.pending.pop().unwrap();
            for low in container.iter() {
                self.result.push(base | low as u32);
            }
            return;
        }
        let mut bits = [0u64; BITSET_WORDS];
        for container in self.pending.drain(..) {
            container.union_into(&mut bits);
        }
        for (word_idx, mut word) in bits.into_iter().enumerate() {
            while word != 0 {
                let bit = word.trailing_zeros();
                word &= word - 1;
                self.result.push(base | (word_idx as u32 * 64 + bit));
            }
        }
    }

    pub fn into_bitmap(mut self) -> RoaringBitmap {
        if let Some(tile) = self.current_tile.take() {
            self.flush_tile(tile);
        }
        self.result
    }
}

/// Builds a bitmap from ascending positions, coalescing consecutive
/// values into range inserts.
#[derive(Default)]
pub struct BitmapBuilderByRange {
    bitmap: RoaringBitmap,
    range_start: u32,
    range_end: u32,
}

impl BitmapBuilderByRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a position greater than every previously added one.
    pub fn add(&mut self, pos: u32) {
        if self.range_start == self.range_end {
            self.range_start = pos;
            self.range_end = pos + 1;
        } else if pos == self.range_end {
            self.range_end += 1;
        } else {
            debug_assert!(pos > self.range_end, "positions must be ascending");
            self.flush();
            self.range_start = pos;
            self.range_end = pos + 1;
        }
    }

    fn flush(&mut self) {
        if self.range_start != self.range_end {
            self.bitmap.insert_range(self.range_start..self.range_end);
        }
    }

    pub fn into_bitmap(mut self) -> RoaringBitmap {
        self.flush();
        self.bitmap
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_single_container_per_tile() {
        let mut builder = BitmapBuilderByContainer::new();
        builder.add_container(0, &[1u16, 5].iter().copied().collect());
        builder.add_container(2, &[0u16, 9].iter().copied().collect());
        let bitmap = builder.into_bitmap();
        let expected = RoaringBitmap::from_iter([1u32, 5, 2 << 16, (2 << 16) | 9]);
        assert_eq!(bitmap, expected);
    }

    #[test]
    fn test_multiple_containers_in_one_tile_are_unioned() {
        let mut builder = BitmapBuilderByContainer::new();
        builder.add_container(1, &[3u16, 8].iter().copied().collect());
        builder.add_container(1, &[2u16, 8, 60000].iter().copied().collect());
        let bitmap = builder.into_bitmap();
        let base = 1u32 << 16;
        let expected = RoaringBitmap::from_iter([base | 2, base | 3, base | 8, base | 60000]);
        assert_eq!(bitmap, expected);
    }

    #[test]
    fn test_empty_containers_are_ignored() {
        let mut builder = BitmapBuilderByContainer::new();
        builder.add_container(4, &Container::default());
        assert_eq!(builder.into_bitmap(), RoaringBitmap::new());
    }

    #[test]
    fn test_range_builder_coalesces_runs() {
        let mut builder = BitmapBuilderByRange::new();
        for pos in [1u32, 2, 3, 7, 8, 20] {
            builder.add(pos);
        }
        let bitmap = builder.into_bitmap();
        assert_eq!(bitmap, RoaringBitmap::from_iter([1u32, 2, 3, 7, 8, 20]));
    }

    #[test]
    fn test_range_builder_starting_at_zero() {
        let mut builder = BitmapBuilderByRange::new();
        builder.add(0);
        builder.add(1);
        assert_eq!(builder.into_bitmap(), RoaringBitmap::from_iter([0u32, 1]));
    }
}
