//! Candidate decision thresholds for the verification sweep.

use serde::{Deserialize, Serialize};

const DEFAULT_START: f32 = 0.1;
const DEFAULT_STOP: f32 = 3.0;
const DEFAULT_STEP: f32 = 0.05;

/// Tolerance, in units of `step`, for treating `stop` as lying on the grid.
const GRID_EPSILON: f64 = 1e-4;

/// Upper bound on the sweep size; finer grids are rejected as invalid.
pub const MAX_CANDIDATES: usize = 1_000_000;

/// Half-open arithmetic progression `[start, stop)` with spacing `step`.
///
/// The default `0.1, 0.15, ..., 2.95` yields 58 candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdRange {
    pub start: f32,
    pub stop: f32,
    pub step: f32,
}

impl Default for ThresholdRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_START,
            stop: DEFAULT_STOP,
            step: DEFAULT_STEP,
        }
    }
}

impl ThresholdRange {
    pub fn new(start: f32, stop: f32, step: f32) -> Self {
        Self { start, stop, step }
    }

    /// True when the range produces at least one finite candidate, no more
    /// than [`MAX_CANDIDATES`], and each step actually advances in f32.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite()
            && self.stop.is_finite()
            && self.step.is_finite()
            && self.step > 0.0
            && self.stop > self.start
            && self.start + self.step > self.start
            && self.span() <= MAX_CANDIDATES as f64
    }

    /// Number of candidates. Zero for an invalid range.
    pub fn len(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        let span = self.span();
        let rounded = span.round();
        if (span - rounded).abs() < GRID_EPSILON {
            rounded as usize
        } else {
            span.ceil() as usize
        }
    }

    fn span(&self) -> f64 {
        (self.stop as f64 - self.start as f64) / self.step as f64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates in ascending order. Each value is computed as
    /// `start + i * step` so error does not accumulate across the range.
    pub fn candidates(&self) -> Vec<f32> {
        let start = self.start as f64;
        let step = self.step as f64;
        (0..self.len())
            .map(|i| (start + i as f64 * step) as f32)
            .collect()
    }
}
