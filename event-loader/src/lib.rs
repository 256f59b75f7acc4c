//! Common event dataset loader.
//!
//! A dataset is a directory with two text files:
//!
//! * `calib.txt` - `fx fy cx cy k1 k2 p1 p2 k3 width height`.
//! * `events.txt` - one `ts x y [z] polarity` event per line, in pixel coordinates.

use anyhow::{ensure, Context};
use evemin::prelude::v1::*;
use log::{debug, trace, warn};
use nalgebra as na;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub const CALIBRATION_FILE: &str = "calib.txt";
pub const EVENTS_FILE: &str = "events.txt";

/// Parse the textual calibration format.
///
/// The vertical focal length is negated, so that the calibrated `y` axis points up.
pub fn parse_calibration(text: &str) -> Result<Camera> {
    let fields = text.split_whitespace().collect::<Vec<_>>();
    ensure!(
        fields.len() >= 11,
        "calibration needs 11 values, got {}",
        fields.len()
    );

    let mut params = [0.0; 9];
    for (p, f) in params.iter_mut().zip(&fields) {
        *p = f
            .parse::<f64>()
            .with_context(|| format!("invalid calibration value {:?}", f))?;
    }

    let width = fields[9]
        .parse::<usize>()
        .with_context(|| format!("invalid width {:?}", fields[9]))?;
    let height = fields[10]
        .parse::<usize>()
        .with_context(|| format!("invalid height {:?}", fields[10]))?;

    let [fx, fy, cx, cy, k1, k2, p1, p2, k3] = params;

    let camera = Camera::from_params(fx, -fy, cx, cy, width, height)?
        .with_distortion([k1, k2, p1, p2, k3]);

    if camera.is_distorted() {
        warn!(
            "Calibration has lens distortion {:?}, events will be undistorted",
            camera.distortion()
        );
    }

    Ok(camera)
}

/// Load a camera from a calibration file.
pub fn load_calibration(path: impl AsRef<Path>) -> Result<Camera> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read calibration {}", path.display()))?;
    parse_calibration(&text).with_context(|| format!("in {}", path.display()))
}

/// Event stream in the textual line format.
///
/// Events are undistorted and unprojected to calibrated coordinates on the fly. Events that
/// land off the sensor, or closer than the minimum depth, are skipped.
pub struct TextEvents<R, const D: usize> {
    lines: std::io::Lines<R>,
    camera: Camera,
    min_depth: f64,
    line: usize,
    dropped: usize,
}

impl<R: BufRead, const D: usize> TextEvents<R, D>
where
    Camera: Projection<D>,
{
    pub fn new(reader: R, camera: Camera) -> Self {
        Self {
            lines: reader.lines(),
            camera,
            min_depth: f64::NEG_INFINITY,
            line: 0,
            dropped: 0,
        }
    }

    /// Skip depth augmented events closer than `min_depth`.
    ///
    /// Events with non-positive depth are always skipped.
    pub fn with_min_depth(mut self, min_depth: f64) -> Self {
        self.min_depth = min_depth;
        self
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Number of events skipped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Convert a raw sensor event to calibrated coordinates.
    fn calibrate(&self, c: &Point<D>) -> Option<Point<D>> {
        if D > 2 && c[2] <= self.min_depth.max(0.0) {
            return None;
        }

        let pixel = self.camera.undistort(na::Point2::new(c[0], c[1]))?;

        let mut c = *c;
        c[0] = pixel.x;
        c[1] = pixel.y;

        Some(self.camera.unproject(&c))
    }
}

impl<R: BufRead, const D: usize> EventSource<D> for TextEvents<R, D>
where
    Camera: Projection<D>,
{
    fn next_event(&mut self) -> Result<Option<Event<D>>> {
        while let Some(line) = self.lines.next() {
            let line = line?;
            self.line += 1;

            if line.trim().is_empty() {
                continue;
            }

            let mut event = line
                .parse::<Event<D>>()
                .with_context(|| format!("on line {}", self.line))?;

            match self.calibrate(&event.c) {
                Some(c) => {
                    event.c = c;
                    return Ok(Some(event));
                }
                None => {
                    if self.dropped == 0 {
                        warn!("Skipping out-of-frame event on line {}", self.line);
                    } else {
                        trace!("Skipping out-of-frame event on line {}", self.line);
                    }
                    self.dropped += 1;
                }
            }
        }

        if self.dropped > 0 {
            debug!("{} events skipped in {} lines", self.dropped, self.line);
        }

        Ok(None)
    }

    fn get_dim(&self) -> Option<(usize, usize)> {
        Some(self.camera.dim())
    }
}

/// Create an event source from an input path.
///
/// `tcp://` inputs are interpreted as network streams rather than regular files.
pub fn create_source<const D: usize>(
    input: &str,
    camera: Camera,
) -> Result<TextEvents<BufReader<Box<dyn Read + Send>>, D>>
where
    Camera: Projection<D>,
{
    let reader = evemin::utils::open_file(input)
        .with_context(|| format!("unable to open events {}", input))?;
    Ok(TextEvents::new(BufReader::new(reader), camera))
}

/// Open a dataset directory.
///
/// Returns the calibrated camera along with the event stream.
pub fn open_dataset<const D: usize>(
    dir: impl AsRef<Path>,
) -> Result<TextEvents<BufReader<Box<dyn Read + Send>>, D>>
where
    Camera: Projection<D>,
{
    let dir = dir.as_ref();
    let camera = load_calibration(dir.join(CALIBRATION_FILE))?;

    let events = dir.join(EVENTS_FILE);
    let events = events
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 path {}", events.display()))?;

    create_source(events, camera)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const CALIB: &str = "200 200 120 90 0 0 0 0 0 240 180\n";

    fn source<const D: usize>(
        camera: Camera,
        text: &'static str,
    ) -> TextEvents<&'static [u8], D>
    where
        Camera: Projection<D>,
    {
        TextEvents::new(text.as_bytes(), camera)
    }

    #[test]
    fn calibration() {
        let camera = parse_calibration(CALIB).unwrap();

        assert_eq!(camera.dim(), (240, 180));
        assert_eq!(camera.intrinsics()[(0, 0)], 200.0);
        assert_eq!(camera.intrinsics()[(1, 1)], -200.0);
        assert_eq!(camera.intrinsics()[(0, 2)], 120.0);
        assert!(!camera.is_distorted());

        let camera = parse_calibration("200 200 120 90 -0.3 0.1 0 0 0 240 180").unwrap();
        assert_eq!(camera.distortion(), &[-0.3, 0.1, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn bad_calibration() {
        assert!(parse_calibration("200 200 120 90").is_err());
        assert!(parse_calibration("200 200 120 90 0 0 0 0 0 240 abc").is_err());
        assert!(parse_calibration("0 200 120 90 0 0 0 0 0 240 180").is_err());
    }

    #[test]
    fn planar_events() {
        let _ = env_logger::builder().is_test(true).try_init();

        let camera = parse_calibration(CALIB).unwrap();
        let mut events = source::<2>(camera, "0.001 120 90 1\n\n0.002 320 40 0\n0.003 140 70 0\n");

        let first = events.next_event().unwrap().unwrap();
        assert_eq!(first.ts, 0.001);
        assert_eq!(first.c, Point::<2>::zeros());
        assert_eq!(first.polarity, Polarity::Positive);

        // The second event is off the sensor.
        let second = events.next_event().unwrap().unwrap();
        assert_eq!(second.ts, 0.003);
        assert_approx_eq!(second.c.x, 0.1, 1e-12);
        assert_approx_eq!(second.c.y, 0.1, 1e-12);
        assert_eq!(second.polarity.sign(), -1);

        assert!(events.next_event().unwrap().is_none());
        assert_eq!(events.dropped(), 1);
        assert_eq!(events.get_dim(), Some((240, 180)));
    }

    #[test]
    fn depth_events() {
        let camera = parse_calibration(CALIB).unwrap();
        let mut events =
            source::<3>(camera, "0.1 140 70 2 1\n0.2 140 70 0.5 1\n").with_min_depth(1.0);

        let ev = events.next_event().unwrap().unwrap();
        assert_approx_eq!(ev.c.x, 0.2, 1e-12);
        assert_approx_eq!(ev.c.y, 0.2, 1e-12);
        assert_eq!(ev.c.z, 2.0);

        assert!(events.next_event().unwrap().is_none());
        assert_eq!(events.dropped(), 1);
    }

    #[test]
    fn non_positive_depth() {
        let camera = parse_calibration(CALIB).unwrap();
        let mut events =
            source::<3>(camera, "0.1 120 90 0 1\n0.2 120 90 -1 0\n0.3 140 70 1 1\n");

        let ev = events.next_event().unwrap().unwrap();
        assert_eq!(ev.ts, 0.3);
        assert!(ev.c.iter().all(|v| v.is_finite()));

        assert!(events.next_event().unwrap().is_none());
        assert_eq!(events.dropped(), 2);
    }

    #[test]
    fn malformed_line() {
        let camera = parse_calibration(CALIB).unwrap();
        let mut events = source::<2>(camera, "0.1 10 10 1\n0.2 oops 10 1\n");

        assert!(events.next_event().unwrap().is_some());
        let err = events.next_event().unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn distorted_events_round_trip() {
        let camera = parse_calibration("200 200 120 90 -0.2 0.05 0.001 -0.001 0 240 180").unwrap();
        let raw = camera.distort(na::Point2::new(150.0, 60.0));
        let line = format!("0.5 {} {} 1\n", raw.x, raw.y);

        let mut events = TextEvents::<_, 2>::new(line.as_bytes(), camera);
        let ev = events.next_event().unwrap().unwrap();

        let pixel = camera.project(&ev.c);
        assert_approx_eq!(pixel.x, 150.0, 1e-3);
        assert_approx_eq!(pixel.y, 60.0, 1e-3);
    }
}
