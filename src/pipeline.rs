//! # Estimation Pipeline
//!
//! One acquisition cycle: filter, gate on variance, find and validate peaks,
//! estimate vitals. `Pipeline::process` is a pure function of the window and
//! returns why a window was rejected; `AcquisitionLoop` decides what to do
//! about it (always: count it and try the next window).

use crate::config::{Config, FilterConfig, PeakConfig};
use crate::error::{ProcessError, RejectReason, SourceError};
use crate::filter::dc_remove_and_smooth;
use crate::history::ReadingHistory;
use crate::peaks::{find_peaks, validate_peaks, PeakValidation};
use crate::server::{PlxServer, PublishMode};
use crate::source::{acquire_window, SampleSource, SampleWindow};
use crate::transport::Transport;
use crate::vitals::{sample_variance, VitalsEstimate, VitalsEstimator, WindowPeaks};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Pipeline {
    filter: FilterConfig,
    peaks: PeakConfig,
    estimator: VitalsEstimator,
}

/// Map a failed peak validation to the reason reported for the window.
fn validation_failure(peaks: &[usize], validation: &PeakValidation) -> Option<RejectReason> {
    if validation.valid {
        None
    } else if peaks.len() < 2 {
        Some(RejectReason::InsufficientPeaks)
    } else {
        Some(RejectReason::AmplitudeVariationTooHigh)
    }
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            filter: config.filter.clone(),
            peaks: config.peaks.clone(),
            estimator: VitalsEstimator::new(config.vitals.clone()),
        }
    }

    pub fn process(&self, window: SampleWindow) -> Result<VitalsEstimate, ProcessError> {
        let window_len = window.len();
        let window_duration_s = window.duration().as_secs_f64();

        let filtered = dc_remove_and_smooth(window, self.filter.width, self.filter.rounding)?;

        let ir_variance = self.estimator.check_variance(&filtered.ir)?;
        let red_variance = if self.estimator.gates_red_variance() {
            self.estimator.check_variance(&filtered.red)?
        } else {
            sample_variance(&filtered.red)
        };
        log::debug!(
            "Variance of moving average: ir={:.1} red={:.1}",
            ir_variance,
            red_variance
        );

        let ir_peaks = find_peaks(&filtered.ir, self.peaks.min_distance);
        let red_peaks = find_peaks(&filtered.red, self.peaks.min_distance);
        log::debug!("ir peaks: {:?}", ir_peaks);
        log::debug!("red peaks: {:?}", red_peaks);

        let threshold = self.peaks.amplitude_threshold_pct;
        let ir_validation = validate_peaks(&filtered.ir, &ir_peaks, threshold);
        if let Some(reason) = validation_failure(&ir_peaks, &ir_validation) {
            return Err(reason.into());
        }
        let red_validation = validate_peaks(&filtered.red, &red_peaks, threshold);
        if let Some(reason) = validation_failure(&red_peaks, &red_validation) {
            return Err(reason.into());
        }

        let estimate = self.estimator.estimate(WindowPeaks {
            ir_peaks: &ir_validation.accepted,
            red_peaks: &red_validation.accepted,
            dc_ir: filtered.dc_ir,
            dc_red: filtered.dc_red,
            window_duration_s,
            window_len,
        })?;
        Ok(estimate)
    }
}

/// Outcome counters across cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub accepted: u64,
    pub published: u64,
    pub rejected: HashMap<RejectReason, u64>,
    pub errors: u64,
}

impl CycleStats {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn rejections(&self, reason: RejectReason) -> u64 {
        self.rejected.get(&reason).copied().unwrap_or(0)
    }

    fn summary(&self) -> String {
        let reasons: Vec<String> = RejectReason::all()
            .iter()
            .filter(|r| self.rejections(**r) > 0)
            .map(|r| format!("{}: {}", r, self.rejections(*r)))
            .collect();
        format!(
            "{} cycles, {} accepted, {} published, {} rejected [{}], {} errors",
            self.cycles,
            self.accepted,
            self.published,
            self.rejected_total(),
            reasons.join(", "),
            self.errors
        )
    }
}

/// Drives acquisition, estimation, aggregation and publishing.
pub struct AcquisitionLoop<T: Transport> {
    pipeline: Pipeline,
    history: ReadingHistory,
    server: Arc<PlxServer<T>>,
    publish: PublishMode,
    window_len: usize,
    sample_interval: Duration,
    stats: CycleStats,
}

impl<T: Transport> AcquisitionLoop<T> {
    pub fn new(config: &Config, server: Arc<PlxServer<T>>) -> Self {
        Self {
            pipeline: Pipeline::new(config),
            history: ReadingHistory::new(config.history.window),
            server,
            publish: config.transport.publish,
            window_len: config.acquisition.window_len(),
            sample_interval: config.acquisition.sample_interval(),
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Process one window. Returns the averaged reading when one was published.
    pub fn run_cycle(&mut self, window: SampleWindow) -> Option<VitalsEstimate> {
        self.stats.cycles += 1;
        let started_at = window.started_at();

        let estimate = match self.pipeline.process(window) {
            Ok(estimate) => estimate,
            Err(ProcessError::Rejected(reason)) => {
                log::info!("Signal not valid ({}), discarding window", reason);
                *self.stats.rejected.entry(reason).or_insert(0) += 1;
                log::debug!("{}", self.stats.summary());
                return None;
            }
            Err(e) => {
                log::error!("{}", e);
                self.stats.errors += 1;
                return None;
            }
        };

        self.stats.accepted += 1;
        log::info!(
            "Window {}: spo2 {:.2}%, bpm {:.2}",
            started_at.format("%H:%M:%S"),
            estimate.spo2,
            estimate.bpm
        );

        let average = self.history.push(estimate)?;
        log::info!(
            "Average of last {} readings: spo2 {:.2}%, bpm {:.2}",
            self.history.len(),
            average.spo2,
            average.bpm
        );
        let report = self.server.publish(&average, self.publish);
        log::debug!("Delivery: {:?}", report);
        self.stats.published += 1;
        log::debug!("{}", self.stats.summary());
        Some(average)
    }

    /// Acquire and process windows until `stop` is set, the source runs dry,
    /// or `max_cycles` windows have been handled.
    pub fn run<S: SampleSource + ?Sized>(
        &mut self,
        source: &mut S,
        stop: &AtomicBool,
        max_cycles: Option<u64>,
    ) -> &CycleStats {
        while !stop.load(Ordering::Relaxed) {
            if max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                break;
            }
            let window = match acquire_window(source, self.window_len, self.sample_interval) {
                Ok(window) => window,
                Err(SourceError::Exhausted) => {
                    log::info!("Sample source exhausted");
                    break;
                }
                Err(e) => {
                    log::error!("{}", e);
                    self.stats.errors += 1;
                    break;
                }
            };
            self.run_cycle(window);
        }

        log::info!("Acquisition stopped: {}", self.stats.summary());
        &self.stats
    }
}
