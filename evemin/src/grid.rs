//! # Spatial bucket index

use crate::cell::Cell;
use nalgebra as na;

/// Integer pixel coordinate of a bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bucket {
    pub x: usize,
    pub y: usize,
}

impl Bucket {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Dense grid of [`Cell`]s, one per pixel.
///
/// Cells are stored in row-major order. The grid only holds slot indices; the event data lives in
/// the [`EventWindow`](crate::window::EventWindow) that owns the grid.
#[derive(Clone, Debug)]
pub struct Grid {
    cells: Vec<Cell>,
    width: usize,
    height: usize,
}

impl Grid {
    /// Create a new grid.
    ///
    /// # Arguments
    ///
    /// * `width` - number of buckets along x.
    /// * `height` - number of buckets along y.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            cells: vec![Cell::default(); width * height],
            width,
            height,
        }
    }

    /// Get width and height of the grid.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Round a pixel-space point to its bucket.
    ///
    /// Points outside the grid are clamped onto the border buckets.
    pub fn bucket(&self, pixel: na::Point2<f64>) -> Bucket {
        let clamp = |v: f64, dim: usize| (v.round().max(0.0) as usize).min(dim - 1);
        Bucket::new(clamp(pixel.x, self.width), clamp(pixel.y, self.height))
    }

    fn idx(&self, bucket: Bucket) -> usize {
        self.width * bucket.y + bucket.x
    }

    /// Get the cell of a bucket.
    pub fn cell(&self, bucket: Bucket) -> &Cell {
        &self.cells[self.idx(bucket)]
    }

    pub(crate) fn add(&mut self, bucket: Bucket, ind: usize) {
        let idx = self.idx(bucket);
        self.cells[idx].add(ind);
    }

    pub(crate) fn remove(&mut self, bucket: Bucket) -> usize {
        let idx = self.idx(bucket);
        self.cells[idx].remove()
    }

    /// Collect indices of every bucket in a square neighbourhood.
    ///
    /// The square spans `radius` buckets on each side of `center` and is clamped to the grid.
    /// `out` is cleared first.
    pub fn neighbours_into(&self, center: Bucket, radius: usize, out: &mut Vec<usize>) {
        out.clear();

        let x0 = center.x.saturating_sub(radius);
        let x1 = std::cmp::min(center.x.saturating_add(radius), self.width - 1);
        let y0 = center.y.saturating_sub(radius);
        let y1 = std::cmp::min(center.y.saturating_add(radius), self.height - 1);

        for y in y0..=y1 {
            for x in x0..=x1 {
                out.extend(self.cell(Bucket::new(x, y)).iter());
            }
        }
    }

    /// Collect indices of every bucket in a square neighbourhood into a fresh vector.
    pub fn neighbours(&self, center: Bucket, radius: usize) -> Vec<usize> {
        let mut out = vec![];
        self.neighbours_into(center, radius, &mut out);
        out
    }

    /// Iterate all non-empty buckets.
    ///
    /// The resulting iterator yields `(bucket, cell)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &Cell)> + '_ {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(move |(i, c)| (Bucket::new(i % width, i / width), c))
    }
}
