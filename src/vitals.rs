//! # Vitals Estimation
//!
//! Turns validated peaks and DC levels into an SpO2 and pulse-rate estimate.
//!
//! The "AC" term used here is the average peak spacing expressed in
//! seconds, and R is the ratio of the two channels' AC/DC ratios. SpO2
//! follows the linear calibration `offset - slope * R`; the ratio order and
//! the calibration constants are coupled and must be changed together.

use crate::config::VitalsConfig;
use crate::error::RejectReason;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioOrder {
    /// R = (red AC/DC) / (ir AC/DC)
    RedOverIr,
    /// R = (ir AC/DC) / (red AC/DC)
    IrOverRed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsEstimate {
    /// Percent
    pub spo2: f64,
    /// Beats per minute, 0 when no rate could be derived
    pub bpm: f64,
}

/// Unbiased sample variance; 0 for fewer than two samples.
pub fn sample_variance(signal: &[i64]) -> f64 {
    let n = signal.len();
    if n < 2 {
        return 0.0;
    }
    let mean = signal.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    signal
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1) as f64
}

/// Truncated mean spacing between consecutive peak indices; 0 for fewer than two peaks.
pub fn average_peak_difference(peaks: &[usize]) -> usize {
    if peaks.len() < 2 {
        return 0;
    }
    let total: usize = peaks.windows(2).map(|w| w[1] - w[0]).sum();
    total / (peaks.len() - 1)
}

/// Inputs of one estimate besides the configuration
#[derive(Debug, Clone, Copy)]
pub struct WindowPeaks<'a> {
    pub ir_peaks: &'a [usize],
    pub red_peaks: &'a [usize],
    pub dc_ir: u32,
    pub dc_red: u32,
    pub window_duration_s: f64,
    pub window_len: usize,
}

#[derive(Debug, Clone)]
pub struct VitalsEstimator {
    config: VitalsConfig,
}

impl VitalsEstimator {
    pub fn new(config: VitalsConfig) -> Self {
        Self { config }
    }

    /// Gate a filtered channel on its variance lying in `(low, high]`.
    pub fn check_variance(&self, signal: &[i64]) -> Result<f64, RejectReason> {
        let variance = sample_variance(signal);
        if variance > self.config.variance_high {
            return Err(RejectReason::VarianceTooHigh);
        }
        if variance <= self.config.variance_low {
            return Err(RejectReason::VarianceTooLow);
        }
        Ok(variance)
    }

    pub fn gates_red_variance(&self) -> bool {
        self.config.gate_red_variance
    }

    /// Pulse rate from the IR AC time constant, clamped into the configured range.
    pub fn bpm(&self, ir_ac: f64) -> f64 {
        if ir_ac <= self.config.min_ir_ac {
            return 0.0;
        }
        let bpm = 60.0 / ir_ac;
        bpm.clamp(self.config.min_bpm, self.config.max_bpm)
    }

    pub fn spo2(&self, ratio_of_ratios: f64) -> f64 {
        self.config.calibration_offset - self.config.calibration_slope * ratio_of_ratios
    }

    pub fn estimate(&self, input: WindowPeaks<'_>) -> Result<VitalsEstimate, RejectReason> {
        if input.window_len == 0 || input.dc_ir == 0 || input.dc_red == 0 {
            return Err(RejectReason::DivisionByZero);
        }
        let seconds_per_sample = input.window_duration_s / input.window_len as f64;

        let ir_ac = average_peak_difference(input.ir_peaks) as f64 * seconds_per_sample;
        let red_ac = average_peak_difference(input.red_peaks) as f64 * seconds_per_sample;

        let ir_ratio = ir_ac / f64::from(input.dc_ir);
        let red_ratio = red_ac / f64::from(input.dc_red);

        let (numerator, denominator) = match self.config.ratio_order {
            RatioOrder::RedOverIr => (red_ratio, ir_ratio),
            RatioOrder::IrOverRed => (ir_ratio, red_ratio),
        };
        if denominator == 0.0 {
            return Err(RejectReason::DivisionByZero);
        }
        let r = numerator / denominator;

        let estimate = VitalsEstimate {
            spo2: self.spo2(r),
            bpm: self.bpm(ir_ac),
        };
        log::debug!(
            "ir_ac={:.3}s red_ac={:.3}s R={:.4} spo2={:.2} bpm={:.2}",
            ir_ac,
            red_ac,
            r,
            estimate.spo2,
            estimate.bpm
        );
        Ok(estimate)
    }
}
