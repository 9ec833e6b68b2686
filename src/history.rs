use crate::vitals::VitalsEstimate;
use std::collections::VecDeque;

/// Rolling buffer of the most recent estimates.
///
/// Emits the mean of the buffered readings once every `capacity` pushes,
/// which rate-limits how often a value goes out over the air.
#[derive(Debug, Clone)]
pub struct ReadingHistory {
    readings: VecDeque<VitalsEstimate>,
    capacity: usize,
    pushed: u64,
}

impl ReadingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
            pushed: 0,
        }
    }

    pub fn push(&mut self, estimate: VitalsEstimate) -> Option<VitalsEstimate> {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(estimate);
        self.pushed += 1;

        if self.pushed % self.capacity as u64 != 0 {
            return None;
        }

        let n = self.readings.len() as f64;
        let spo2 = self.readings.iter().map(|r| r.spo2).sum::<f64>() / n;
        let bpm = self.readings.iter().map(|r| r.bpm).sum::<f64>() / n;
        Some(VitalsEstimate { spo2, bpm })
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Total readings pushed since creation
    pub fn pushed(&self) -> u64 {
        self.pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(spo2: f64, bpm: f64) -> VitalsEstimate {
        VitalsEstimate { spo2, bpm }
    }

    #[test]
    fn test_emits_every_capacity_pushes() {
        let mut history = ReadingHistory::new(4);
        assert!(history.push(reading(96.0, 60.0)).is_none());
        assert!(history.push(reading(97.0, 62.0)).is_none());
        assert!(history.push(reading(98.0, 64.0)).is_none());

        let avg = history.push(reading(99.0, 66.0)).unwrap();
        assert!((avg.spo2 - 97.5).abs() < 1e-9);
        assert!((avg.bpm - 63.0).abs() < 1e-9);
        assert_eq!(history.pushed(), 4);
    }

    #[test]
    fn test_batches_are_not_sliding() {
        let mut history = ReadingHistory::new(2);
        assert!(history.push(reading(90.0, 60.0)).is_none());
        assert!(history.push(reading(92.0, 60.0)).is_some());
        assert!(history.push(reading(94.0, 60.0)).is_none());

        // Average covers only the last two readings
        let avg = history.push(reading(96.0, 80.0)).unwrap();
        assert!((avg.spo2 - 95.0).abs() < 1e-9);
        assert!((avg.bpm - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut history = ReadingHistory::new(3);
        for i in 0..10 {
            history.push(reading(90.0 + i as f64, 60.0));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_capacity_one_emits_each_reading() {
        let mut history = ReadingHistory::new(1);
        assert_eq!(history.push(reading(95.0, 70.0)), Some(reading(95.0, 70.0)));
    }
}
