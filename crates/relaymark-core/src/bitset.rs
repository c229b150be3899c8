//! Fixed-width bitset over u64 words, used by the exact solver to keep
//! coverage sets cheap to copy, union, and count.

/// Bitset with a width fixed at construction. Indices at or past the
/// width are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    width: usize,
    words: Vec<u64>,
}

impl BitSet {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            words: vec![0; width.div_ceil(64)],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn set(&mut self, index: usize) {
        if index < self.width {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.width && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &BitSet) {
        debug_assert_eq!(self.width, other.width);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// Bits set in `self` but not in `covered`: the marginal gain of
    /// adding `self` on top of `covered`.
    pub fn count_minus(&self, covered: &BitSet) -> usize {
        debug_assert_eq!(self.width, covered.width);
        self.words
            .iter()
            .zip(&covered.words)
            .map(|(w, c)| (w & !c).count_ones() as usize)
            .sum()
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.width).filter(move |i| self.contains(*i))
    }
}
