use crate::error::MonitorError;
use crate::plx::PULSE_OXIMETER_SERVICE_UUID;
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OximeterDevice {
    pub id: String,
    pub name: String,
    pub peripheral: Peripheral,
}

/// A peripheral is worth connecting to when it advertises the Pulse Oximeter
/// service or carries the configured device name.
pub fn is_candidate(local_name: Option<&str>, advertises_service: bool, wanted_name: &str) -> bool {
    if advertises_service {
        return true;
    }
    match local_name {
        Some(name) => {
            !wanted_name.is_empty() && name.trim().eq_ignore_ascii_case(wanted_name.trim())
        }
        None => false,
    }
}

pub async fn first_adapter() -> Result<Adapter, MonitorError> {
    let manager = Manager::new()
        .await
        .map_err(|e| MonitorError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| MonitorError::ManagerInit(e.to_string()))?;

    adapters.into_iter().next().ok_or(MonitorError::NoAdapter)
}

/// Scans for nearby pulse oximeters for `scan_time`
pub async fn scan_devices(
    central: &Adapter,
    scan_time: Duration,
    wanted_name: &str,
) -> Result<Vec<OximeterDevice>, MonitorError> {
    let service = uuid_from_u16(PULSE_OXIMETER_SERVICE_UUID);

    // Some stacks drop name-only advertisers when filtering by service, so
    // filter here instead of in the adapter.
    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| MonitorError::ScanFailed(e.to_string()))?;

    tokio::time::sleep(scan_time).await;

    central
        .stop_scan()
        .await
        .map_err(|e| MonitorError::ScanFailed(e.to_string()))?;

    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| MonitorError::ScanFailed(e.to_string()))?;

    let mut devices = Vec::new();
    for peripheral in peripherals {
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            _ => continue,
        };
        let advertises_service = props.services.contains(&service);
        if !is_candidate(props.local_name.as_deref(), advertises_service, wanted_name) {
            continue;
        }

        let id = peripheral.address().to_string();
        let name = props.local_name.unwrap_or_else(|| id.clone());
        log::info!("Found pulse oximeter {} ({})", name, id);
        devices.push(OximeterDevice {
            id,
            name,
            peripheral,
        });
    }

    Ok(devices)
}
