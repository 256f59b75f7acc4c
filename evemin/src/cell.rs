//! # Cyclic bucket cell

use crate::utils::is_power_of_two;

/// Growable circular FIFO of window slot indices.
///
/// A cell is owned by a single spatial bucket of the [`Grid`](crate::grid::Grid). It keeps the
/// slots of live events that fell into the bucket, oldest first. Storage length is always a
/// power of two, so wraparound is a mask instead of a modulo.
#[derive(Clone, Debug)]
pub struct Cell {
    ind: Vec<usize>,
    first: usize,
    last: usize,
    n: usize,
}

impl Default for Cell {
    fn default() -> Self {
        Self::with_capacity(2)
    }
}

impl Cell {
    /// Create an empty cell.
    ///
    /// # Panics
    ///
    /// If `capacity` is not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            is_power_of_two(capacity),
            "cell capacity {} is not a power of two",
            capacity
        );

        Self {
            ind: vec![0; capacity],
            first: 0,
            last: 0,
            n: 0,
        }
    }

    fn mask(&self) -> usize {
        self.ind.len() - 1
    }

    /// Number of indices currently held.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Size of the underlying storage.
    pub fn capacity(&self) -> usize {
        self.ind.len()
    }

    /// Get the `k`-th oldest index.
    ///
    /// # Panics
    ///
    /// If `k >= self.len()`.
    pub fn ind(&self, k: usize) -> usize {
        assert!(k < self.n, "cell index {} out of {}", k, self.n);
        self.ind[(self.first + k) & self.mask()]
    }

    /// Iterate the held indices from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n).map(move |k| self.ind(k))
    }

    /// Append an index.
    ///
    /// When the cell is full the storage doubles. The old contents are unrolled so that the FIFO
    /// order still starts at `first`.
    pub fn add(&mut self, ind: usize) {
        if self.n >= self.ind.len() {
            let n = self.n;
            self.ind.resize(n << 1, 0);
            // The wrapped head `[0, last)` moves right behind the tail.
            if self.first > 0 {
                self.ind.copy_within(0..self.last, n);
            }
            self.last += n;
            debug_assert!(is_power_of_two(self.ind.len()));
        }

        self.ind[self.last] = ind;
        self.n += 1;
        self.last = (self.last + 1) & self.mask();
    }

    /// Drop the oldest index.
    ///
    /// Returns the number of remaining indices. Removing from an empty cell does nothing.
    pub fn remove(&mut self) -> usize {
        if self.n > 0 {
            self.first = (self.first + 1) & self.mask();
            self.n -= 1;
        }
        self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut cell = Cell::default();

        for i in 0..5 {
            cell.add(i);
        }

        assert_eq!(cell.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(cell.remove(), 4);
        assert_eq!(cell.ind(0), 1);
        assert_eq!(cell.ind(3), 4);
    }

    #[test]
    fn grows_while_wrapped() {
        let mut cell = Cell::with_capacity(4);

        // Move the head off zero so the next growth has to unroll a wrapped buffer.
        for i in 0..3 {
            cell.add(i);
        }
        cell.remove();
        cell.remove();

        for i in 3..10 {
            cell.add(i);
        }

        assert!(cell.capacity().is_power_of_two());
        assert_eq!(cell.capacity(), 8);
        assert_eq!(cell.iter().collect::<Vec<_>>(), (2..10).collect::<Vec<_>>());

        cell.add(10);
        assert_eq!(cell.capacity(), 16);
        assert_eq!(cell.iter().collect::<Vec<_>>(), (2..11).collect::<Vec<_>>());
    }

    #[test]
    fn remove_empty() {
        let mut cell = Cell::default();
        assert_eq!(cell.remove(), 0);
        cell.add(7);
        assert_eq!(cell.remove(), 0);
        assert_eq!(cell.remove(), 0);
        assert!(cell.is_empty());
    }

    #[test]
    #[should_panic]
    fn non_power_of_two() {
        Cell::with_capacity(3);
    }
}
