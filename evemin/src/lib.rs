//! # Event-based Motion Estimation Library
//!
//! This library estimates camera motion from an event camera stream by minimising the dispersion
//! of motion compensated events. The estimate is refined incrementally, one event at a time,
//! over a sliding window of recent events.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use evemin::prelude::v1::*;
//! ```
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of the functionality.

pub mod camera;
pub mod cell;
pub mod energy;
pub mod estimator;
pub mod event;
pub mod grid;
pub mod model;
pub mod stats;
pub mod utils;
pub mod window;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            camera::{Camera, Projection},
            energy::{Energy, Potential, Tsallis},
            estimator::{DispersionParams, Estimator, IncrementalDispersion, VarsEstimate},
            event::{Event, EventSource, Polarity},
            model::{
                Model, Point, Rotation, Similarity, SixDof, Translation2D, TranslationNormal, Vars,
            },
        };
        pub use anyhow::{anyhow, Error, Result};
    }
}
