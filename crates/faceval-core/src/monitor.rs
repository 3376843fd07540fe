//! Best-accuracy tracking for periodic validation during training.
//!
//! The training loop calls [`ValidationMonitor::is_due`] every step and,
//! when due, hands the evaluation result to [`ValidationMonitor::record`].
//! A failed evaluation is logged and skipped; the last known-good best is kept.

use crate::scorer::ScorerError;
use crate::types::{Evaluation, OperatingPoint};

/// Result of recording one validation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationOutcome {
    /// Accuracy beat both the floor and the previous best.
    NewBest(OperatingPoint),
    NotImproved(OperatingPoint),
    /// Evaluation failed; nothing changed.
    Failed,
}

impl ValidationOutcome {
    pub fn is_new_best(&self) -> bool {
        matches!(self, ValidationOutcome::NewBest(_))
    }
}

/// Best operating point seen so far and the step it was measured at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestRecord {
    pub step: u64,
    pub point: OperatingPoint,
}

#[derive(Debug, Clone)]
pub struct ValidationMonitor {
    interval: u64,
    accuracy_floor: f32,
    best: Option<BestRecord>,
    last: Option<OperatingPoint>,
    failures: u64,
}

impl ValidationMonitor {
    /// `interval` of zero disables scheduled validation; [`record`](Self::record) still works.
    pub fn new(interval: u64, accuracy_floor: f32) -> Self {
        Self {
            interval,
            accuracy_floor,
            best: None,
            last: None,
            failures: 0,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn accuracy_floor(&self) -> f32 {
        self.accuracy_floor
    }

    /// Step 0 is never due.
    pub fn is_due(&self, step: u64) -> bool {
        self.interval > 0 && step > 0 && step % self.interval == 0
    }

    pub fn best(&self) -> Option<BestRecord> {
        self.best
    }

    pub fn best_accuracy(&self) -> f32 {
        self.best.map(|b| b.point.accuracy).unwrap_or(0.0)
    }

    /// Most recent successful evaluation, improved or not.
    pub fn last(&self) -> Option<OperatingPoint> {
        self.last
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn record(
        &mut self,
        step: u64,
        result: Result<Evaluation, ScorerError>,
    ) -> ValidationOutcome {
        let eval = match result {
            Ok(eval) => eval,
            Err(err) => {
                self.failures += 1;
                tracing::error!(
                    step,
                    error = %err,
                    best_accuracy = self.best_accuracy(),
                    "validation failed; keeping last best"
                );
                return ValidationOutcome::Failed;
            }
        };

        let point = eval.best;
        self.last = Some(point);
        let previous = self.best_accuracy();

        tracing::info!(
            step,
            accuracy = point.accuracy,
            threshold = point.threshold,
            best_accuracy = previous,
            "validation accuracy"
        );

        if point.accuracy > self.accuracy_floor && point.accuracy > previous {
            tracing::info!(step, accuracy = point.accuracy, "new best validation accuracy");
            self.best = Some(BestRecord { step, point });
            ValidationOutcome::NewBest(point)
        } else {
            ValidationOutcome::NotImproved(point)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(accuracy: f32, threshold: f32) -> Result<Evaluation, ScorerError> {
        let best = OperatingPoint { threshold, accuracy };
        Ok(Evaluation {
            best,
            sweep: vec![best],
            distances: vec![0.5],
            pair_count: 1,
        })
    }

    #[test]
    fn test_is_due() {
        let m = ValidationMonitor::new(2000, 0.85);
        assert!(!m.is_due(0));
        assert!(!m.is_due(1999));
        assert!(m.is_due(2000));
        assert!(m.is_due(6000));
        assert!(!ValidationMonitor::new(0, 0.0).is_due(2000));
    }

    #[test]
    fn test_floor_blocks_low_accuracy() {
        let mut m = ValidationMonitor::new(10, 0.85);
        let outcome = m.record(10, eval(0.80, 1.0));
        assert!(matches!(outcome, ValidationOutcome::NotImproved(p) if p.accuracy == 0.80));
        assert!(m.best().is_none());
        assert_eq!(m.last().unwrap().accuracy, 0.80);
    }

    #[test]
    fn test_tracks_strict_improvement() {
        let mut m = ValidationMonitor::new(10, 0.5);
        assert!(m.record(10, eval(0.9, 1.1)).is_new_best());
        assert!(!m.record(20, eval(0.9, 1.2)).is_new_best());
        assert!(!m.record(30, eval(0.85, 1.2)).is_new_best());
        assert!(m.record(40, eval(0.95, 1.0)).is_new_best());

        let best = m.best().unwrap();
        assert_eq!(best.step, 40);
        assert_eq!(best.point.accuracy, 0.95);
    }

    #[test]
    fn test_failure_keeps_last_good_best() {
        let mut m = ValidationMonitor::new(10, 0.0);
        m.record(10, eval(0.7, 0.9));
        let outcome = m.record(20, Err(ScorerError::EmptyDataset));
        assert_eq!(outcome, ValidationOutcome::Failed);
        assert_eq!(m.failures(), 1);
        assert_eq!(m.best().unwrap().step, 10);
        assert_eq!(m.best_accuracy(), 0.7);
        assert_eq!(m.last().unwrap().accuracy, 0.7);
    }
}
