//! # Monitor Module
//!
//! Central-side counterpart of the server: finds a pulse oximeter, subscribes
//! to its PLX measurements and logs every reading it receives.
//!
//! Runs on its own Tokio runtime so callers can drive it from a plain thread.

use crate::device_scanner::{first_adapter, scan_devices, OximeterDevice};
use crate::error::MonitorError;
use crate::plx::{
    self, PLX_CONTINUOUS_CHAR_UUID, PLX_FEATURES_CHAR_UUID, PLX_SPOT_CHECK_CHAR_UUID,
};
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::Peripheral as _;
use chrono::Local;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const SCAN_TIME: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Decode a features read. Short values are treated as no features.
pub fn decode_features(bytes: &[u8]) -> u32 {
    match bytes.get(..4) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => 0,
    }
}

pub struct Monitor {
    device_name: String,
    should_stop: Arc<AtomicBool>,
}

impl Monitor {
    pub fn new(device_name: String, should_stop: Arc<AtomicBool>) -> Self {
        Self {
            device_name,
            should_stop,
        }
    }

    /// Blocks until the device disconnects or the stop flag is raised.
    pub fn run(&self) -> Result<(), MonitorError> {
        let rt = Runtime::new().map_err(|e| MonitorError::RuntimeCreation(e.to_string()))?;
        rt.block_on(self.monitor())
    }

    async fn monitor(&self) -> Result<(), MonitorError> {
        let central = first_adapter().await?;
        log::info!("Scanning for {} ({:?})", self.device_name, SCAN_TIME);

        let device = loop {
            if self.should_stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            let mut devices = scan_devices(&central, SCAN_TIME, &self.device_name).await?;
            if !devices.is_empty() {
                break devices.remove(0);
            }
            log::info!("No pulse oximeter found, scanning again");
        };

        self.connect(&device).await?;
        let result = self.receive(&device).await;

        if let Err(e) = device.peripheral.disconnect().await {
            log::warn!("Disconnect from {} failed: {}", device.id, e);
        }
        result
    }

    async fn connect(&self, device: &OximeterDevice) -> Result<(), MonitorError> {
        let failed = |e: btleplug::Error| MonitorError::DeviceConnection {
            device_id: device.id.clone(),
            reason: e.to_string(),
        };

        log::info!("Connecting to {}", device.name);
        device.peripheral.connect().await.map_err(failed)?;
        device.peripheral.discover_services().await.map_err(failed)?;

        let characteristics = device.peripheral.characteristics();
        let find = |uuid: u16| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid_from_u16(uuid))
                .cloned()
                .ok_or(MonitorError::MissingCharacteristic(uuid))
        };

        match find(PLX_FEATURES_CHAR_UUID) {
            Ok(features) => {
                let value = device.peripheral.read(&features).await.map_err(failed)?;
                log::info!("Supported features: 0x{:08X}", decode_features(&value));
            }
            Err(e) => log::warn!("{}", e),
        }

        let continuous = find(PLX_CONTINUOUS_CHAR_UUID)?;
        device.peripheral.subscribe(&continuous).await.map_err(failed)?;

        // Spot-check is optional; not every server indicates it
        match find(PLX_SPOT_CHECK_CHAR_UUID) {
            Ok(spot_check) => device.peripheral.subscribe(&spot_check).await.map_err(failed)?,
            Err(e) => log::debug!("{}", e),
        }

        log::info!("Connected to {}", device.name);
        Ok(())
    }

    async fn receive(&self, device: &OximeterDevice) -> Result<(), MonitorError> {
        let mut notifications = device
            .peripheral
            .notifications()
            .await
            .map_err(|e| MonitorError::DeviceConnection {
                device_id: device.id.clone(),
                reason: e.to_string(),
            })?;

        let continuous = uuid_from_u16(PLX_CONTINUOUS_CHAR_UUID);
        let should_stop = self.should_stop.clone();

        let readings = async {
            while let Some(notification) = notifications.next().await {
                let kind = if notification.uuid == continuous {
                    "continuous"
                } else {
                    "spot-check"
                };
                match plx::decode_measurement(&notification.value) {
                    Some(reading) => log::info!(
                        "[{}] {}: SpO2 {:.2}%, Pulse {:.2} bpm",
                        Local::now().format("%H:%M:%S"),
                        kind,
                        reading.spo2,
                        reading.bpm
                    ),
                    None => log::warn!(
                        "Ignoring {}-byte {} measurement",
                        notification.value.len(),
                        kind
                    ),
                }
            }
        };

        tokio::select! {
            _ = readings => {
                log::info!("Notification stream from {} ended", device.name);
            }
            _ = async {
                while !should_stop.load(Ordering::Relaxed) {
                    tokio::time::sleep(STOP_POLL).await;
                }
            } => {
                log::info!("Disconnecting from {}", device.name);
            }
        }
        Ok(())
    }
}
