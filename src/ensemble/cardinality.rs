//! Role cardinality: a fixed count or an inclusive range

use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Exact(usize),
    Range { min: usize, max: usize },
}

impl Cardinality {
    pub fn range(min: usize, max: usize) -> Self {
        Cardinality::Range { min, max }
    }

    /// Inclusive `(min, max)` bounds
    pub fn bounds(&self) -> (usize, usize) {
        match *self {
            Cardinality::Exact(n) => (n, n),
            Cardinality::Range { min, max } => (min, max),
        }
    }

    pub fn min(&self) -> usize {
        self.bounds().0
    }

    pub fn max(&self) -> usize {
        self.bounds().1
    }

    /// False when the bounds are inverted and no selection can satisfy them
    pub fn is_satisfiable(&self) -> bool {
        let (min, max) = self.bounds();
        min <= max
    }

    pub fn admits(&self, count: usize) -> bool {
        let (min, max) = self.bounds();
        count >= min && count <= max
    }
}

impl From<usize> for Cardinality {
    fn from(n: usize) -> Self {
        Cardinality::Exact(n)
    }
}

impl From<(usize, usize)> for Cardinality {
    fn from((min, max): (usize, usize)) -> Self {
        Cardinality::Range { min, max }
    }
}

impl From<RangeInclusive<usize>> for Cardinality {
    fn from(range: RangeInclusive<usize>) -> Self {
        Cardinality::Range {
            min: *range.start(),
            max: *range.end(),
        }
    }
}
