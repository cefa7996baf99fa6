//! Biased Mapped Array - Per-Granule Table
//!
//! A flat array with one entry per fixed-size granule of an address range.
//! Entry `i` covers `[base + i * granule, base + (i + 1) * granule)`:
//!
//! ```text
//! base = 0x7f00_0000_0000, granule = 4KB
//!
//! entry 3 starts at 0x7f00_0000_3000
//! ```

/// BiasedMappedArray - one `T` per granule of `[base, end)`
#[derive(Debug, Clone)]
pub struct BiasedMappedArray<T> {
    /// Per-granule values
    entries: Vec<T>,

    /// First covered address
    base: usize,

    /// log2 of the granule size
    shift: u32,
}

impl<T: Copy + Default> BiasedMappedArray<T> {
    /// Create a table covering `[base, end)` with every entry at `T::default()`
    ///
    /// # Panics
    /// If `granule` is not a power of two or `end < base`.
    pub fn new(base: usize, end: usize, granule: usize) -> Self {
        assert!(
            granule.is_power_of_two(),
            "granule {} must be a power of two",
            granule
        );
        assert!(end >= base, "end {:#x} below base {:#x}", end, base);

        let length = (end - base).div_ceil(granule);

        Self {
            entries: vec![T::default(); length],
            base,
            shift: granule.trailing_zeros(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get entry by index
    pub fn get_by_index(&self, index: usize) -> T {
        self.entries[index]
    }

    /// Set entry by index
    pub fn set_by_index(&mut self, index: usize, value: T) {
        self.entries[index] = value;
    }

    /// Address of the first byte of entry `index`
    pub(crate) fn address_of(&self, index: usize) -> usize {
        self.base + (index << self.shift)
    }
}
