//! # Error Types Module
//!
//! Centralized error handling for the pulse oximeter.
//! Each stage of the pipeline has its own error type so callers can tell
//! startup-fatal problems apart from the recoverable, per-window ones.
//!
//! ## Error Types
//! - `ConfigError`: Configuration file I/O, parsing and validation errors
//! - `RejectReason`: Why an acquisition window produced no estimate
//! - `ProcessError`: Outcome of one failed estimation cycle
//! - `SourceError`: Sample source exhausted or unreadable
//! - `TransportError`: Characteristic delivery failures
//! - `AdvertisingError`: Advertising payload construction errors
//! - `MonitorError`: Bluetooth central (monitor mode) failures
//!
//! ## Recoverability
//! Only `ConfigError` raised at startup may terminate the process. Everything
//! else is logged and the next acquisition cycle is attempted.

use crate::transport::PeerId;
use std::fmt;

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// Moving average width is zero or longer than the signal
    InvalidWindowSize { width: usize, len: usize },
    /// Acquisition window holds no samples
    EmptyWindow,
    /// Any other out-of-range setting
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::InvalidWindowSize { width, len } => {
                write!(
                    f,
                    "Invalid moving average width {} for a signal of {} samples",
                    width, len
                )
            }
            ConfigError::EmptyWindow => {
                write!(f, "Acquisition window must contain at least one sample")
            }
            ConfigError::Invalid(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Reasons a window is discarded without producing an estimate.
///
/// All of them are recoverable: the caller acquires a fresh window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Filtered IR variance at or below the lower bound (sensor off finger)
    VarianceTooLow,
    /// Filtered IR variance above the upper bound (motion or ambient light)
    VarianceTooHigh,
    /// Fewer than two peaks in a channel
    InsufficientPeaks,
    /// Majority of peaks disagree with both of their neighbours
    AmplitudeVariationTooHigh,
    /// A DC level or AC ratio was zero
    DivisionByZero,
}

impl RejectReason {
    pub fn all() -> [RejectReason; 5] {
        [
            RejectReason::VarianceTooLow,
            RejectReason::VarianceTooHigh,
            RejectReason::InsufficientPeaks,
            RejectReason::AmplitudeVariationTooHigh,
            RejectReason::DivisionByZero,
        ]
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::VarianceTooLow => write!(f, "IR variance too low"),
            RejectReason::VarianceTooHigh => write!(f, "IR variance too high"),
            RejectReason::InsufficientPeaks => write!(f, "not enough peaks"),
            RejectReason::AmplitudeVariationTooHigh => {
                write!(f, "peak amplitude variation too high")
            }
            RejectReason::DivisionByZero => write!(f, "division by zero in ratio calculation"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Failure of a single estimation cycle
#[derive(Debug)]
pub enum ProcessError {
    Config(ConfigError),
    Rejected(RejectReason),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Config(e) => write!(f, "Window could not be processed: {}", e),
            ProcessError::Rejected(reason) => write!(f, "Signal not valid: {}", reason),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Config(e) => Some(e),
            ProcessError::Rejected(r) => Some(r),
        }
    }
}

impl From<ConfigError> for ProcessError {
    fn from(e: ConfigError) -> Self {
        ProcessError::Config(e)
    }
}

impl From<RejectReason> for ProcessError {
    fn from(r: RejectReason) -> Self {
        ProcessError::Rejected(r)
    }
}

/// Errors produced by a sample source
#[derive(Debug)]
pub enum SourceError {
    /// No more samples will ever be produced
    Exhausted,
    /// Underlying reader failed
    Io(std::io::Error),
    /// A replay line could not be parsed as `ir,red`
    Parse { line: usize, content: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Exhausted => write!(f, "Sample source exhausted"),
            SourceError::Io(e) => write!(f, "Failed to read samples: {}", e),
            SourceError::Parse { line, content } => {
                write!(f, "Invalid sample on line {}: {:?}", line, content)
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that can occur while delivering characteristic updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer did not acknowledge an indication in time
    Timeout,
    /// Peer went away before or during the send
    Disconnected(PeerId),
    /// Any other failure reported by the Bluetooth stack
    Stack(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "Indication was not acknowledged in time"),
            TransportError::Disconnected(peer) => write!(f, "Peer {} is disconnected", peer),
            TransportError::Stack(msg) => write!(f, "Bluetooth stack error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors raised while building an advertising payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertisingError {
    /// Field value does not fit behind a one-byte length prefix
    FieldTooLong { field_type: u8, len: usize },
}

impl fmt::Display for AdvertisingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisingError::FieldTooLong { field_type, len } => {
                write!(
                    f,
                    "Advertising field 0x{:02X} is {} bytes long, at most 254 fit",
                    field_type, len
                )
            }
        }
    }
}

impl std::error::Error for AdvertisingError {}

/// Errors that can occur in monitor (central) mode
#[derive(Debug)]
pub enum MonitorError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapters available
    NoAdapter,
    /// Scan operation failed
    ScanFailed(String),
    /// Failed to connect to or talk to a specific device
    DeviceConnection { device_id: String, reason: String },
    /// Peripheral does not expose a required characteristic
    MissingCharacteristic(u16),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            MonitorError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            MonitorError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            MonitorError::ScanFailed(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
            MonitorError::DeviceConnection { device_id, reason } => {
                write!(f, "Failed to connect to device {}: {}", device_id, reason)
            }
            MonitorError::MissingCharacteristic(uuid) => {
                write!(f, "Characteristic 0x{:04X} not found on device", uuid)
            }
        }
    }
}

impl std::error::Error for MonitorError {}
