//! # Sliding event window
//!
//! The window stores the most recent events in power-of-two circular buffers and keeps the spatial
//! [`Grid`] in sync with them. Every insertion and eviction goes through this type, so a slot is
//! present in exactly one grid cell while its event is live and in none once it is evicted.

use crate::grid::{Bucket, Grid};
use crate::model::Point;
use crate::utils::{next_power_of_two, CyclicIndex};
use anyhow::{ensure, Result};
use log::debug;

#[derive(Clone, Debug)]
pub struct EventWindow<const D: usize> {
    c: Vec<Point<D>>,
    ts: Vec<f64>,
    buckets: Vec<Bucket>,
    grid: Grid,
    /// Next slot to write.
    cursor: CyclicIndex,
    /// Oldest live slot.
    reference: CyclicIndex,
    /// Most recently written slot.
    previous: Option<usize>,
    len: usize,
    target: usize,
    nominal: usize,
}

impl<const D: usize> EventWindow<D> {
    /// Create a new window.
    ///
    /// # Arguments
    ///
    /// * `size` - nominal number of events to keep.
    /// * `width` - width of the bucket grid.
    /// * `height` - height of the bucket grid.
    pub fn new(size: usize, width: usize, height: usize) -> Result<Self> {
        ensure!(size > 0, "event window must hold at least one event");
        ensure!(width > 0 && height > 0, "empty grid {}x{}", width, height);

        let capacity = next_power_of_two(size);

        debug!(
            "event window of {} events ({} slots), grid {}x{}",
            size, capacity, width, height
        );

        Ok(Self {
            c: vec![Point::zeros(); capacity],
            ts: vec![0.0; capacity],
            buckets: vec![Bucket::default(); capacity],
            grid: Grid::new(width, height),
            cursor: CyclicIndex::new(capacity),
            reference: CyclicIndex::new(capacity),
            previous: None,
            len: 0,
            target: size,
            nominal: size,
        })
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of events the window currently aims to hold.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Number of events requested at construction.
    pub fn nominal(&self) -> usize {
        self.nominal
    }

    /// Number of slots in the circular buffers.
    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Coordinate stored in a slot.
    pub fn point(&self, slot: usize) -> &Point<D> {
        &self.c[slot]
    }

    /// Timestamp stored in a slot.
    pub fn timestamp(&self, slot: usize) -> f64 {
        self.ts[slot]
    }

    /// Bucket a slot is filed under.
    pub fn bucket(&self, slot: usize) -> Bucket {
        self.buckets[slot]
    }

    /// Timestamp of the oldest live event.
    pub fn reference_timestamp(&self) -> Option<f64> {
        Some(self.ts[self.reference.get()]).filter(|_| self.len > 0)
    }

    /// Timestamp of the most recently inserted event.
    pub fn previous_timestamp(&self) -> Option<f64> {
        self.previous.map(|slot| self.ts[slot])
    }

    /// Iterate live slots from oldest to newest.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |k| self.reference.offset(k))
    }

    /// Collect live slots filed in the square neighbourhood of a bucket.
    pub fn neighbours_into(&self, center: Bucket, radius: usize, out: &mut Vec<usize>) {
        self.grid.neighbours_into(center, radius, out)
    }

    /// Drop the oldest live event.
    fn evict(&mut self) {
        debug_assert!(self.len > 0);
        let slot = self.reference.get();
        self.grid.remove(self.buckets[slot]);
        self.reference.advance();
        self.len -= 1;
    }

    /// Make room for one incoming event.
    ///
    /// While the window is filling up this returns the proportion of the target the window will
    /// hold with the new event, `(len + 1) / target`. Once full, the oldest event is evicted and
    /// `1` is returned.
    pub fn admit(&mut self) -> f64 {
        if self.len < self.target {
            (self.len + 1) as f64 / self.target as f64
        } else {
            self.evict();
            1.0
        }
    }

    /// Write a new event to the window.
    ///
    /// [`admit`](Self::admit) must have been called beforehand.
    pub fn insert(&mut self, c: &Point<D>, ts: f64, bucket: Bucket) {
        debug_assert!(self.len < self.capacity());

        let slot = self.cursor.get();
        self.c[slot] = *c;
        self.ts[slot] = ts;
        self.buckets[slot] = bucket;
        self.grid.add(bucket, slot);

        self.previous = Some(slot);
        self.cursor.advance();
        self.len += 1;
    }

    /// Shrink (or restore) the window to `nominal / inc` events.
    ///
    /// Surplus events are evicted immediately, oldest first. Returns the number of evicted
    /// events.
    pub fn set_inc(&mut self, inc: f64) -> Result<usize> {
        ensure!(
            inc.is_finite() && inc >= 1.0,
            "window increment {} must be a finite value of at least 1",
            inc
        );

        self.target = std::cmp::max((self.nominal as f64 / inc) as usize, 1);

        let surplus = self.len.saturating_sub(self.target);
        for _ in 0..surplus {
            self.evict();
        }

        debug!(
            "window target {} events, evicted {}",
            self.target, surplus
        );

        Ok(surplus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    fn push(window: &mut EventWindow<2>, i: usize) -> f64 {
        let n_prop = window.admit();
        let bucket = Bucket::new(i % 7, i % 5);
        window.insert(&na::vector![i as f64, 0.0], i as f64, bucket);
        n_prop
    }

    /// Every live slot sits in exactly one cell, and nothing else does.
    fn assert_consistent(window: &EventWindow<2>) {
        let mut filed = window
            .grid()
            .iter()
            .flat_map(|(bucket, cell)| cell.iter().map(move |slot| (slot, bucket)))
            .collect::<Vec<_>>();
        filed.sort_unstable_by_key(|&(slot, _)| slot);

        let mut live = window
            .slots()
            .map(|slot| (slot, window.bucket(slot)))
            .collect::<Vec<_>>();
        live.sort_unstable_by_key(|&(slot, _)| slot);

        assert_eq!(filed, live);
    }

    #[test]
    fn capacity_is_power_of_two() {
        assert_eq!(EventWindow::<2>::new(5, 4, 4).unwrap().capacity(), 8);
        assert_eq!(EventWindow::<2>::new(8, 4, 4).unwrap().capacity(), 8);
        assert!(EventWindow::<2>::new(0, 4, 4).is_err());
        assert!(EventWindow::<2>::new(4, 0, 4).is_err());
    }

    #[test]
    fn live_count_saturates() {
        for size in [1, 3, 8, 13] {
            let mut window = EventWindow::<2>::new(size, 10, 10).unwrap();

            for n in 1..=40 {
                push(&mut window, n);
                assert_eq!(window.len(), std::cmp::min(n, size));
                assert_consistent(&window);
            }
        }
    }

    #[test]
    fn evicts_oldest() {
        let size = 6;
        let mut window = EventWindow::<2>::new(size, 10, 10).unwrap();

        for n in 0..size {
            push(&mut window, n);
        }
        assert_eq!(window.reference_timestamp(), Some(0.0));

        for n in size..30 {
            push(&mut window, n);
            // The event inserted `size` events earlier is gone, the one after it is the oldest.
            let oldest = (n + 1 - size) as f64;
            assert_eq!(window.reference_timestamp(), Some(oldest));
            assert!(window.slots().all(|s| window.timestamp(s) >= oldest));
            assert_eq!(window.previous_timestamp(), Some(n as f64));
        }
    }

    #[test]
    fn warm_up_proportion() {
        let size = 10;
        let mut window = EventWindow::<2>::new(size, 10, 10).unwrap();

        let props = (0..25).map(|n| push(&mut window, n)).collect::<Vec<_>>();

        for k in 0..size {
            assert_eq!(props[k], (k + 1) as f64 / size as f64);
        }
        assert!(props[..size - 1].windows(2).all(|w| w[0] < w[1]));
        assert!(props[size..].iter().all(|&p| p == 1.0));
    }

    #[test]
    fn resize_evicts_surplus() {
        let size = 16;
        let mut window = EventWindow::<2>::new(size, 10, 10).unwrap();

        for n in 0..13 {
            push(&mut window, n);
        }

        assert_eq!(window.set_inc(2.0).unwrap(), 13 - size / 2);
        assert_eq!(window.len(), size / 2);
        assert_eq!(window.reference_timestamp(), Some(5.0));
        assert_consistent(&window);

        // Window stays at the new target.
        for n in 13..40 {
            push(&mut window, n);
            assert_eq!(window.len(), size / 2);
            assert_consistent(&window);
        }

        // Restoring the target does not evict anything.
        assert_eq!(window.set_inc(1.0).unwrap(), 0);
        assert_eq!(window.admit(), (size / 2 + 1) as f64 / size as f64);
    }

    #[test]
    fn resize_below_live_count_only() {
        let mut window = EventWindow::<2>::new(16, 10, 10).unwrap();

        for n in 0..5 {
            push(&mut window, n);
        }

        assert_eq!(window.set_inc(2.0).unwrap(), 0);
        assert_eq!(window.len(), 5);
        assert_eq!(window.target(), 8);
        assert!(window.set_inc(0.5).is_err());
        assert!(window.set_inc(f64::NAN).is_err());
    }

    #[test]
    fn empty_window_has_no_reference() {
        let mut window = EventWindow::<2>::new(1, 2, 2).unwrap();
        assert_eq!(window.reference_timestamp(), None);
        assert_eq!(window.previous_timestamp(), None);

        push(&mut window, 3);
        assert_eq!(window.reference_timestamp(), Some(3.0));

        // A window of one event is empty again while the next event is being admitted.
        window.admit();
        assert!(window.is_empty());
        assert_eq!(window.reference_timestamp(), None);
        assert_eq!(window.previous_timestamp(), Some(3.0));
    }
}
