//! # Event streams

use crate::model::Point;
use crate::prelude::v1::*;
use std::str::FromStr;

/// Polarity of a brightness change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Negative,
    Positive,
}

impl Polarity {
    /// Convert from the textual `0`/`1` (or `-1`/`1`) encoding.
    pub fn from_raw(raw: i32) -> Self {
        if raw > 0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    /// Signed representation, `-1` or `1`.
    pub fn sign(self) -> i8 {
        match self {
            Self::Negative => -1,
            Self::Positive => 1,
        }
    }
}

/// Single event captured by the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event<const D: usize> {
    /// Spatial coordinate.
    pub c: Point<D>,
    /// Timestamp in seconds.
    pub ts: f64,
    pub polarity: Polarity,
}

impl<const D: usize> Event<D> {
    pub fn new(c: Point<D>, ts: f64, polarity: Polarity) -> Self {
        Self { c, ts, polarity }
    }
}

/// Parses the `ts c0 .. cD-1 polarity` text line format.
impl<const D: usize> FromStr for Event<D> {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| {
            fields
                .next()
                .ok_or_else(|| anyhow!("missing {} in event line {:?}", what, line))
        };

        let ts = next("timestamp")?.parse::<f64>()?;

        let mut c = Point::<D>::zeros();
        for i in 0..D {
            c[i] = next("coordinate")?.parse::<f64>()?;
        }

        let polarity = Polarity::from_raw(next("polarity")?.parse::<i32>()?);

        Ok(Self { c, ts, polarity })
    }
}

/// Source of events.
pub trait EventSource<const D: usize> {
    /// Read the next event in the stream.
    ///
    /// Returns `Ok(None)` once the stream is exhausted, and `Err` if the stream is malformed.
    /// Events come out in non-decreasing timestamp order.
    fn next_event(&mut self) -> Result<Option<Event<D>>>;

    /// Get the sensor size of the stream, if known.
    fn get_dim(&self) -> Option<(usize, usize)> {
        None
    }
}

impl<const D: usize> EventSource<D> for std::vec::IntoIter<Event<D>> {
    fn next_event(&mut self) -> Result<Option<Event<D>>> {
        Ok(self.next())
    }
}
