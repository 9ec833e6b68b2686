//! # Peak Detection and Validation
//!
//! Finds cardiac peaks in a filtered channel and checks that their
//! amplitudes agree well enough for the spacing between them to be trusted.

/// Indices of local maxima in `signal`, strictly increasing, each at least
/// `min_distance` samples after the previously accepted one.
///
/// A sample is a candidate when it is strictly greater than its left
/// neighbour and not smaller than its right one, so the first sample of a
/// plateau wins.
pub fn find_peaks(signal: &[i64], min_distance: usize) -> Vec<usize> {
    let mut peaks: Vec<usize> = Vec::new();
    if signal.len() < 3 {
        return peaks;
    }

    for i in 1..signal.len() - 1 {
        if signal[i] > signal[i - 1] && signal[i] >= signal[i + 1] {
            match peaks.last() {
                Some(&last) if i - last < min_distance => {}
                _ => peaks.push(i),
            }
        }
    }
    peaks
}

/// Percentage difference between two peak amplitudes relative to the larger one.
pub fn amplitude_variation(a: i64, b: i64) -> f64 {
    let higher = a.max(b);
    let lower = a.min(b);
    if higher == 0 {
        return if lower == 0 { 0.0 } else { 100.0 };
    }
    ((higher - lower) as f64 / higher as f64).abs() * 100.0
}

/// Per-peak diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct PeakVariation {
    pub index: usize,
    pub amplitude: i64,
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakValidation {
    /// More than half of the peaks were accepted
    pub valid: bool,
    pub accepted: Vec<usize>,
    pub variations: Vec<PeakVariation>,
}

impl PeakValidation {
    fn rejected() -> Self {
        Self {
            valid: false,
            accepted: Vec::new(),
            variations: Vec::new(),
        }
    }
}

/// Keep the peaks whose amplitude is within `threshold_pct` of at least one
/// neighbouring peak.
pub fn validate_peaks(signal: &[i64], peaks: &[usize], threshold_pct: f64) -> PeakValidation {
    if peaks.len() < 2 {
        log::debug!("Not enough peaks to validate ({})", peaks.len());
        return PeakValidation::rejected();
    }

    let amplitudes: Vec<i64> = peaks.iter().map(|&p| signal[p]).collect();
    let mut accepted = Vec::with_capacity(peaks.len());
    let mut variations = Vec::with_capacity(peaks.len());

    for (i, &index) in peaks.iter().enumerate() {
        let amplitude = amplitudes[i];
        let left = (i > 0).then(|| amplitude_variation(amplitudes[i - 1], amplitude));
        let right = amplitudes
            .get(i + 1)
            .map(|&next| amplitude_variation(next, amplitude));

        let agrees = |v: Option<f64>| v.is_some_and(|v| v < threshold_pct);
        let ok = agrees(left) || agrees(right);

        log::debug!(
            "Peak {} at {}: amplitude {}, left {:?}, right {:?}, accepted {}",
            i,
            index,
            amplitude,
            left,
            right,
            ok
        );

        if ok {
            accepted.push(index);
        }
        variations.push(PeakVariation {
            index,
            amplitude,
            left,
            right,
            accepted: ok,
        });
    }

    let valid = accepted.len() > peaks.len() / 2;
    log::debug!("{} of {} peaks accepted", accepted.len(), peaks.len());

    PeakValidation {
        valid,
        accepted,
        variations,
    }
}
