//! Streaming quantile estimation with the P² algorithm.
//!
//! Five markers track the minimum, the maximum, the target quantile `p` and the two
//! quantiles `p/2` and `(1+p)/2` between them. Each new value shifts the positions of the
//! markers above it, after which every interior marker that has drifted a full position away
//! from its desired position is moved back by one, with its height predicted by a piecewise
//! parabolic fit through its neighbours (or a linear one when the parabola would overshoot).
//! Memory use is constant no matter how many values are seen.
use log::trace;
use serde::{Deserialize, Serialize};

pub const MARKERS: usize = 5;

/// Which markers move when a value arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerUpdate {
    /// Jain & Chlamtac's update: every marker above the value's cell shifts, all desired
    /// positions advance and markers 1 to 3 may be adjusted.
    #[default]
    Standard,
    /// The narrower update older implementations ran. Only markers up to index 3 shift, and
    /// all of them do when the value is a new minimum. The desired position of the maximum
    /// never advances, and only markers 1 and 2 are adjusted. Marker 3 therefore keeps its
    /// initial height unless a value below it is seen.
    Legacy,
}

/// The estimator's state once five observations have been seen.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub heights: [f64; MARKERS],
    pub positions: [i64; MARKERS],
    pub desired_positions: [f64; MARKERS],
    pub desired_increments: [f64; MARKERS],
}

impl MarkerState {
    fn new(initial: [f64; MARKERS], p: f64) -> Self {
        MarkerState {
            heights: initial,
            positions: [1, 2, 3, 4, 5],
            desired_positions: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            desired_increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
        }
    }

    fn observe(&mut self, x: f64, update: MarkerUpdate) {
        let new_minimum = x < self.heights[0];
        let h = &mut self.heights;
        // cell k such that h[k] <= x < h[k + 1], widening the outer markers if needed
        let k = if x < h[0] {
            h[0] = x;
            0
        } else if x >= h[4] {
            h[4] = x;
            3
        } else {
            (1..4).find(|&i| x < h[i]).map_or(3, |i| i - 1)
        };

        // (first shifted marker, markers shifted or advanced, last adjusted marker)
        let (first, moved, last) = match update {
            MarkerUpdate::Standard => (k + 1, MARKERS, MARKERS - 2),
            MarkerUpdate::Legacy => (if new_minimum { 0 } else { k + 1 }, MARKERS - 1, 2),
        };
        for position in &mut self.positions[first..moved] {
            *position += 1;
        }
        for (desired, increment) in self
            .desired_positions
            .iter_mut()
            .zip(self.desired_increments.iter())
            .take(moved)
        {
            *desired += increment;
        }

        for i in 1..=last {
            let d = self.desired_positions[i] - self.positions[i] as f64;
            let room_above = self.positions[i + 1] - self.positions[i] > 1;
            let room_below = self.positions[i - 1] - self.positions[i] < -1;
            if (d >= 1.0 && room_above) || (d <= -1.0 && room_below) {
                let step = if d > 0.0 { 1 } else { -1 };
                let candidate = self.parabolic(i, step);
                self.heights[i] =
                    if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                        candidate
                    } else {
                        self.linear(i, step)
                    };
                self.positions[i] += step;
            }
        }
    }

    fn parabolic(&self, i: usize, step: i64) -> f64 {
        let d = step as f64;
        let q = &self.heights;
        let n = self.positions.map(|p| p as f64);
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, step: i64) -> f64 {
        let j = if step > 0 { i + 1 } else { i - 1 };
        let q = &self.heights;
        let n = &self.positions;
        q[i] + step as f64 * (q[j] - q[i]) / (n[j] - n[i]) as f64
    }

    /// The middle marker, which tracks the target quantile.
    pub fn estimate(&self) -> f64 {
        self.heights[2]
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EstimatorState {
    Buffering(Vec<f64>),
    Estimating(MarkerState),
}

/// P² estimator for a single quantile of a single field.
///
/// The first four values are only buffered, no estimate exists until the fifth arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileEstimator {
    quantile: f64,
    sort_initial_markers: bool,
    marker_update: MarkerUpdate,
    seen: u64,
    state: EstimatorState,
}

impl QuantileEstimator {
    pub fn new(quantile: f64) -> Self {
        Self::with_marker_sorting(quantile, true)
    }

    /// `sort_initial_markers = false` seeds the markers with the first five values in arrival
    /// order instead of sorted order. The resulting markers are not guaranteed to be monotone,
    /// so estimates may fall outside the observed range; this exists only to reproduce
    /// estimates produced by older, unsorted implementations.
    pub fn with_marker_sorting(quantile: f64, sort_initial_markers: bool) -> Self {
        QuantileEstimator {
            quantile,
            sort_initial_markers,
            marker_update: MarkerUpdate::default(),
            seen: 0,
            state: EstimatorState::Buffering(Vec::with_capacity(MARKERS - 1)),
        }
    }

    pub fn with_marker_update(mut self, marker_update: MarkerUpdate) -> Self {
        self.marker_update = marker_update;
        self
    }

    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    pub fn count(&self) -> u64 {
        self.seen
    }

    /// Adds a value and returns the current estimate, if there is one yet.
    pub fn add(&mut self, x: f64) -> Option<f64> {
        self.seen += 1;
        match &mut self.state {
            EstimatorState::Estimating(markers) => markers.observe(x, self.marker_update),
            EstimatorState::Buffering(buffer) if buffer.len() + 1 < MARKERS => buffer.push(x),
            EstimatorState::Buffering(buffer) => {
                let mut initial = [x; MARKERS];
                initial[..MARKERS - 1].copy_from_slice(buffer);
                if self.sort_initial_markers {
                    initial.sort_by(f64::total_cmp);
                }
                trace!("quantile {} estimator seeded with {:?}", self.quantile, initial);
                self.state = EstimatorState::Estimating(MarkerState::new(initial, self.quantile));
            }
        }
        self.estimate()
    }

    pub fn estimate(&self) -> Option<f64> {
        self.markers().map(MarkerState::estimate)
    }

    pub fn markers(&self) -> Option<&MarkerState> {
        match &self.state {
            EstimatorState::Estimating(markers) => Some(markers),
            EstimatorState::Buffering(_) => None,
        }
    }

    /// Values held back while fewer than five have been seen.
    pub fn buffered(&self) -> &[f64] {
        match &self.state {
            EstimatorState::Buffering(buffer) => buffer,
            EstimatorState::Estimating(_) => &[],
        }
    }
}
