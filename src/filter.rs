//! # Filter Stage
//!
//! Removes the DC level of each channel over an acquisition window and
//! smooths what is left with a moving average.
//!
//! ## Rounding
//! The calibration constants used by the estimator were tuned against a
//! moving average that divides every term by the width *before* summing,
//! with floor semantics. That policy is `RoundingPolicy::Truncating` and is
//! the default. `RoundingPolicy::Conventional` divides the sum once.

use crate::error::ConfigError;
use crate::source::SampleWindow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// `sum(floor(x / k))` over each window
    Truncating,
    /// `floor(sum(x) / k)` over each window
    Conventional,
}

/// Both filtered channels of one window together with their DC levels
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredWindow {
    pub ir: Vec<i64>,
    pub red: Vec<i64>,
    pub dc_ir: u32,
    pub dc_red: u32,
}

/// Integer mean of a channel, truncated.
pub fn dc_level(values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    (sum / values.len() as u64) as u32
}

pub fn remove_dc(values: &[u32], dc: u32) -> Vec<i64> {
    values.iter().map(|&v| i64::from(v) - i64::from(dc)).collect()
}

/// Moving average of `width` samples, producing `len - width + 1` outputs.
pub fn moving_average(
    signal: &[i64],
    width: usize,
    policy: RoundingPolicy,
) -> Result<Vec<i64>, ConfigError> {
    if width == 0 || width > signal.len() {
        return Err(ConfigError::InvalidWindowSize {
            width,
            len: signal.len(),
        });
    }
    let k = width as i64;

    let terms: Vec<i64> = match policy {
        RoundingPolicy::Truncating => signal.iter().map(|&x| x.div_euclid(k)).collect(),
        RoundingPolicy::Conventional => signal.to_vec(),
    };

    let mut out = Vec::with_capacity(signal.len() - width + 1);
    let mut acc: i64 = terms[..width].iter().sum();
    out.push(acc);
    for i in width..terms.len() {
        acc += terms[i] - terms[i - width];
        out.push(acc);
    }

    if policy == RoundingPolicy::Conventional {
        for v in out.iter_mut() {
            *v = v.div_euclid(k);
        }
    }
    Ok(out)
}

/// Remove DC from both channels of `window` and smooth them.
pub fn dc_remove_and_smooth(
    window: SampleWindow,
    filter_width: usize,
    policy: RoundingPolicy,
) -> Result<FilteredWindow, ConfigError> {
    if window.is_empty() {
        return Err(ConfigError::EmptyWindow);
    }
    if filter_width == 0 || filter_width > window.len() {
        return Err(ConfigError::InvalidWindowSize {
            width: filter_width,
            len: window.len(),
        });
    }

    let (ir_raw, red_raw): (Vec<u32>, Vec<u32>) =
        window.samples().iter().map(|s| (s.ir, s.red)).unzip();

    let dc_ir = dc_level(&ir_raw);
    let dc_red = dc_level(&red_raw);
    log::debug!("DC levels: ir={} red={}", dc_ir, dc_red);

    let ir = moving_average(&remove_dc(&ir_raw, dc_ir), filter_width, policy)?;
    let red = moving_average(&remove_dc(&red_raw, dc_red), filter_width, policy)?;
    log::trace!("Filtered ir: {:?}", ir);
    log::trace!("Filtered red: {:?}", red);

    Ok(FilteredWindow {
        ir,
        red,
        dc_ir,
        dc_red,
    })
}
