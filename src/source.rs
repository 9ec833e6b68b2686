//! # Sample Acquisition Module
//!
//! Produces the paired (IR, RED) 18-bit samples consumed by the filter stage
//! and groups them into fixed-length acquisition windows.
//!
//! ## Key Types
//! - `Sample`: one IR/RED reading
//! - `SampleSource`: anything that yields samples at a fixed rate
//! - `SyntheticSource`: triangle-wave generator for demos and tests
//! - `ReplaySource`: replays `ir,red` lines recorded from a real sensor
//! - `SampleWindow`: a closed window of N samples

use crate::error::SourceError;
use chrono::{DateTime, Local};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Mask for the 18 significant bits of a FIFO sample
pub const SAMPLE_MASK: u32 = 0x3_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub ir: u32,
    pub red: u32,
}

impl Sample {
    pub fn new(ir: u32, red: u32) -> Self {
        Self {
            ir: ir & SAMPLE_MASK,
            red: red & SAMPLE_MASK,
        }
    }
}

/// Decode one 6-byte FIFO record: three bytes RED followed by three bytes IR.
///
/// Only the low two bits of each leading byte carry data.
pub fn decode_fifo_sample(bytes: &[u8; 6]) -> Sample {
    let word = |b: &[u8]| (u32::from(b[0] & 0x03) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
    let red = word(&bytes[0..3]);
    let ir = word(&bytes[3..6]);
    Sample { ir, red }
}

pub trait SampleSource {
    /// Block until the next sample is available.
    fn next_sample(&mut self) -> Result<Sample, SourceError>;
}

/// An ordered, closed window of raw samples
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: Vec<Sample>,
    duration: Duration,
    started_at: DateTime<Local>,
}

impl SampleWindow {
    pub fn new(samples: Vec<Sample>, duration: Duration) -> Self {
        Self {
            samples,
            duration,
            started_at: Local::now(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nominal wall-clock span of the window
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

/// Collect exactly `len` samples from `source`.
pub fn acquire_window<S: SampleSource + ?Sized>(
    source: &mut S,
    len: usize,
    sample_interval: Duration,
) -> Result<SampleWindow, SourceError> {
    let started_at = Local::now();
    let mut samples = Vec::with_capacity(len);
    for _ in 0..len {
        samples.push(source.next_sample()?);
    }
    let duration = sample_interval * len as u32;
    log::debug!("Acquired {} samples starting {}", len, started_at.format("%H:%M:%S%.3f"));
    Ok(SampleWindow {
        samples,
        duration,
        started_at,
    })
}

/// Deterministic PPG-like generator: a triangle wave on top of a DC level
/// per channel, both sharing the same period.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    ir_dc: u32,
    red_dc: u32,
    ir_amplitude: u32,
    red_amplitude: u32,
    period: usize,
    pacing: Option<Duration>,
    tick: usize,
}

impl SyntheticSource {
    /// `amplitude`s are peak-to-peak; `period` is in samples.
    pub fn new(
        ir_dc: u32,
        ir_amplitude: u32,
        red_dc: u32,
        red_amplitude: u32,
        period: usize,
    ) -> Self {
        Self {
            ir_dc,
            red_dc,
            ir_amplitude,
            red_amplitude,
            period: period.max(2),
            pacing: None,
            tick: 0,
        }
    }

    /// Sleep `interval` before every sample, emulating the sensor's sample clock.
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    fn triangle(&self, dc: u32, amplitude: u32) -> u32 {
        let phase = self.tick % self.period;
        let half = self.period / 2;
        let rising = if phase <= half { phase } else { self.period - phase };
        let offset = (amplitude as usize * rising / half.max(1)) as u32;
        (dc.saturating_sub(amplitude / 2) + offset) & SAMPLE_MASK
    }
}

impl SampleSource for SyntheticSource {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        if let Some(interval) = self.pacing {
            std::thread::sleep(interval);
        }
        let sample = Sample {
            ir: self.triangle(self.ir_dc, self.ir_amplitude),
            red: self.triangle(self.red_dc, self.red_amplitude),
        };
        self.tick += 1;
        Ok(sample)
    }
}

/// Replays a recording of `ir,red` lines. Blank lines and `#` comments are skipped.
pub struct ReplaySource {
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    pacing: Option<Duration>,
}

fn read_error(error: csv::Error) -> SourceError {
    let line = error.position().map_or(0, |p| p.line() as usize);
    match error.into_kind() {
        csv::ErrorKind::Io(e) => SourceError::Io(e),
        kind => SourceError::Parse {
            line,
            content: format!("{:?}", kind),
        },
    }
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(SourceError::Io)?;
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);
        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            pacing: None,
        })
    }

    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    fn parse_record(record: &csv::StringRecord) -> Result<Sample, SourceError> {
        let parse_err = || SourceError::Parse {
            line: record.position().map_or(0, |p| p.line() as usize),
            content: record.iter().collect::<Vec<_>>().join(","),
        };
        if record.len() != 2 {
            return Err(parse_err());
        }
        let (ir, red): (u32, u32) = record.deserialize(None).map_err(|_| parse_err())?;
        Ok(Sample::new(ir, red))
    }
}

impl SampleSource for ReplaySource {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        if !self.reader.read_record(&mut self.record).map_err(read_error)? {
            return Err(SourceError::Exhausted);
        }
        if let Some(interval) = self.pacing {
            std::thread::sleep(interval);
        }
        Self::parse_record(&self.record)
    }
}
