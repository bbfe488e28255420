use std::collections::VecDeque;

/// Smooths instantaneous displacement samples into a "stationary" verdict.
///
/// Keeps the last `capacity` displacement magnitudes and reports stationary
/// only while every buffered sample is at or below the flutter threshold, so
/// a single excursion above threshold breaks the verdict until the window
/// refills with sub-threshold samples. The lag biases toward catching real
/// departures over promptly declaring arrivals.
pub struct StabilityFilter {
    window: VecDeque<f64>,
    capacity: usize,
    flutter_threshold_m: f64,
}

impl StabilityFilter {
    pub fn new(capacity: usize, flutter_threshold_m: f64) -> Self {
        StabilityFilter {
            window: VecDeque::with_capacity(capacity),
            capacity,
            flutter_threshold_m,
        }
    }

    /// Coarse variant: 5-sample window, 8 m of normal GPS flutter.
    pub fn coarse() -> Self {
        Self::new(5, 8.0)
    }

    /// Fine variant: 6-sample window, 5 m tolerance.
    pub fn fine() -> Self {
        Self::new(6, 5.0)
    }

    /// Record a displacement sample (meters since the previous accepted fix)
    /// and return whether the whole window currently reads as stationary.
    pub fn is_stationary(&mut self, distance_m: f64) -> bool {
        // Non-finite or negative input can never be stationary; push a
        // sample that fails the threshold so the window lag still applies.
        let sample = if distance_m.is_finite() && distance_m >= 0.0 {
            distance_m
        } else {
            f64::INFINITY
        };

        self.window.push_back(sample);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        self.window.iter().all(|d| *d <= self.flutter_threshold_m)
    }

    /// Drop all buffered samples.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
