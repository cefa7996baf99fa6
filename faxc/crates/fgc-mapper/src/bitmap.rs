//! Commit Bitmap - Tracking Backed Regions
//!
//! One bit per logical region. A set bit means the region is currently
//! backed by physical memory; it is the single source of truth consulted by
//! `is_committed`.
//!
//! Bitmap Structure:
//! ```text
//! 64MB heap / 1MB regions = 64 regions
//! Bitmap size: 64 bits = 1 word
//!
//! Region 37:
//! - Word index: 37 / 64 = 0
//! - Bit offset: 37 % 64 = 37
//! ```
//!
//! Bits are stored in `AtomicU64` words. Setting uses Release ordering and
//! reading uses Acquire ordering, so a reader that observes a set bit also
//! observes the physical commit that preceded it.

use std::sync::atomic::{AtomicU64, Ordering};

const BITS_PER_WORD: usize = 64;

/// CommitBitmap - fixed-size bitmap indexed by region
pub struct CommitBitmap {
    /// Raw bitmap data
    words: Vec<AtomicU64>,

    /// Number of valid bits
    len: usize,
}

impl Clone for CommitBitmap {
    fn clone(&self) -> Self {
        let words: Vec<AtomicU64> = self
            .words
            .iter()
            .map(|word| AtomicU64::new(word.load(Ordering::Acquire)))
            .collect();

        Self {
            words,
            len: self.len,
        }
    }
}

impl std::fmt::Debug for CommitBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitBitmap")
            .field("len", &self.len)
            .field("set", &self.count_ones())
            .finish()
    }
}

impl CommitBitmap {
    /// Create a bitmap with `len` clear bits
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(BITS_PER_WORD);
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();

        Self { words, len }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the bitmap has no bits at all
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check a single bit
    ///
    /// # Panics
    /// If `index >= len`.
    pub fn at(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Set a single bit
    pub fn set_bit(&self, index: usize) {
        let (word, mask) = self.locate(index);
        self.words[word].fetch_or(mask, Ordering::Release);
    }

    /// Clear a single bit
    pub fn clear_bit(&self, index: usize) {
        let (word, mask) = self.locate(index);
        self.words[word].fetch_and(!mask, Ordering::Release);
    }

    /// Set bits `[start, end)`
    pub fn set_range(&self, start: usize, end: usize) {
        self.for_each_word(start, end, |word, mask| {
            word.fetch_or(mask, Ordering::Release);
        });
    }

    /// Clear bits `[start, end)`
    pub fn clear_range(&self, start: usize, end: usize) {
        self.for_each_word(start, end, |word, mask| {
            word.fetch_and(!mask, Ordering::Release);
        });
    }

    /// Check that every bit in `[start, end)` is set
    pub fn is_range_set(&self, start: usize, end: usize) -> bool {
        let mut all = true;
        self.for_each_word(start, end, |word, mask| {
            all &= word.load(Ordering::Acquire) & mask == mask;
        });
        all
    }

    /// Check that every bit in `[start, end)` is clear
    pub fn is_range_clear(&self, start: usize, end: usize) -> bool {
        let mut clear = true;
        self.for_each_word(start, end, |word, mask| {
            clear &= word.load(Ordering::Acquire) & mask == 0;
        });
        clear
    }

    /// Count set bits
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Find the first set bit in `[start, end)`
    pub fn find_first_set(&self, start: usize, end: usize) -> Option<usize> {
        (start..end.min(self.len)).find(|&index| self.at(index))
    }

    /// Iterate over the indices of set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, word)| {
                let mut bits = word.load(Ordering::Acquire);
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(word_index * BITS_PER_WORD + bit)
                })
            })
    }

    /// Get bitmap size in bytes
    pub fn size_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<AtomicU64>()
    }

    fn locate(&self, index: usize) -> (usize, u64) {
        assert!(
            index < self.len,
            "bit index {} out of bounds for bitmap of {} bits",
            index,
            self.len
        );
        (index / BITS_PER_WORD, 1u64 << (index % BITS_PER_WORD))
    }

    /// Apply `f` to every word overlapping `[start, end)` with the mask of
    /// bits inside the range.
    fn for_each_word(&self, start: usize, end: usize, mut f: impl FnMut(&AtomicU64, u64)) {
        assert!(
            start <= end && end <= self.len,
            "bit range [{}, {}) out of bounds for bitmap of {} bits",
            start,
            end,
            self.len
        );

        let mut index = start;
        while index < end {
            let word = index / BITS_PER_WORD;
            let bit = index % BITS_PER_WORD;
            let span = (BITS_PER_WORD - bit).min(end - index);
            let mask = if span == BITS_PER_WORD {
                u64::MAX
            } else {
                ((1u64 << span) - 1) << bit
            };
            f(&self.words[word], mask);
            index += span;
        }
    }
}
