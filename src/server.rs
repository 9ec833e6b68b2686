//! # Pulse Oximeter Characteristic Server
//!
//! Publishes readings on the PLX characteristics and follows the link
//! lifecycle: advertise while idle, fan out to every connected central,
//! advertise again once the last central is gone.
//!
//! ## Delivery
//! - Continuous: write the local value, then notify each peer. A failure on
//!   one peer never stops delivery to the others.
//! - Spot-check: write the local value, start an indication on each peer,
//!   then wait for all acknowledgements against one shared deadline. Peers
//!   that time out or disconnect are dropped for this reading.

use crate::advertising::{AdvertisingData, ServiceId};
use crate::config::TransportConfig;
use crate::connection::ConnectionSet;
use crate::error::{AdvertisingError, TransportError};
use crate::plx::{self, Characteristic, PULSE_OXIMETER_SERVICE_UUID};
use crate::transport::{IndicateStatus, PeerId, Transport, TransportEvent};
use crate::vitals::VitalsEstimate;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Legacy advertising PDUs carry at most 31 bytes of data
const MAX_LEGACY_ADV_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    Continuous,
    SpotCheck,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Advertising,
    Connected(usize),
}

/// Per-reading delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub disconnected: usize,
    pub timed_out: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.disconnected + self.timed_out
    }

    fn merge(self, other: DeliveryReport) -> DeliveryReport {
        DeliveryReport {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
            disconnected: self.disconnected + other.disconnected,
            timed_out: self.timed_out + other.timed_out,
        }
    }
}

pub struct PlxServer<T: Transport> {
    transport: Arc<T>,
    connections: ConnectionSet,
    pending: Mutex<HashMap<PeerId, Sender<IndicateStatus>>>,
    advertising_payload: Vec<u8>,
    advertising_interval: Duration,
    indicate_timeout: Duration,
    features: u32,
}

impl<T: Transport> PlxServer<T> {
    pub fn new(transport: Arc<T>, config: &TransportConfig) -> Result<Self, AdvertisingError> {
        let advertising_payload = AdvertisingData {
            name: Some(config.device_name.clone()),
            services: vec![ServiceId::Uuid16(PULSE_OXIMETER_SERVICE_UUID)],
            appearance: Some(config.appearance),
            ..AdvertisingData::default()
        }
        .encode()?;

        if advertising_payload.len() > MAX_LEGACY_ADV_LEN {
            log::warn!(
                "Advertising payload is {} bytes, legacy advertising carries {}; \
                 shorten the device name",
                advertising_payload.len(),
                MAX_LEGACY_ADV_LEN
            );
        }

        Ok(Self {
            transport,
            connections: ConnectionSet::new(),
            pending: Mutex::new(HashMap::new()),
            advertising_payload,
            advertising_interval: config.advertising_interval(),
            indicate_timeout: config.indicate_timeout(),
            features: config.features,
        })
    }

    /// Publish the feature bitfield and begin advertising.
    pub fn start(&self) -> Result<(), TransportError> {
        self.set_features(self.features)?;
        self.advertise()
    }

    pub fn set_features(&self, features: u32) -> Result<(), TransportError> {
        log::info!("Set features: 0x{:08X}", features);
        self.transport
            .write_local(Characteristic::Features, &plx::encode_features(features))
    }

    fn advertise(&self) -> Result<(), TransportError> {
        log::info!(
            "Advertising every {} ms",
            self.advertising_interval.as_millis()
        );
        self.transport
            .advertise(&self.advertising_payload, self.advertising_interval)
    }

    pub fn advertising_payload(&self) -> &[u8] {
        &self.advertising_payload
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn link_state(&self) -> LinkState {
        match self.connections.len() {
            0 => LinkState::Advertising,
            n => LinkState::Connected(n),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<PeerId, Sender<IndicateStatus>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve_pending(&self, peer: PeerId, status: IndicateStatus) -> bool {
        match self.pending().remove(&peer) {
            Some(tx) => {
                let _ = tx.try_send(status);
                true
            }
            None => false,
        }
    }

    /// Apply one link event. This is the only place the connection set changes.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connect { peer } => {
                self.connections.insert(peer);
                log::info!("Central connected: {} ({:?})", peer, self.link_state());
            }
            TransportEvent::Disconnect { peer } => {
                if !self.connections.remove(peer) {
                    log::warn!("Disconnect for unknown peer {}", peer);
                }
                if self.resolve_pending(peer, IndicateStatus::Abandoned) {
                    log::debug!("Abandoned in-flight indication to {}", peer);
                }
                log::info!("Central disconnected: {}", peer);
                if self.connections.is_empty() {
                    if let Err(e) = self.advertise() {
                        log::error!("Failed to restart advertising: {}", e);
                    }
                }
            }
            TransportEvent::IndicateDone { peer, status } => {
                if !self.resolve_pending(peer, status) {
                    log::debug!(
                        "Indication result {:?} from {} with nothing pending",
                        status,
                        peer
                    );
                }
            }
        }
    }

    pub fn publish(&self, reading: &VitalsEstimate, mode: PublishMode) -> DeliveryReport {
        let value = plx::encode_estimate(reading);
        match mode {
            PublishMode::Continuous => self.publish_continuous(&value),
            PublishMode::SpotCheck => self.publish_spot_check(&value),
            PublishMode::Both => self
                .publish_continuous(&value)
                .merge(self.publish_spot_check(&value)),
        }
    }

    pub fn publish_continuous(&self, value: &[u8]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if let Err(e) = self.transport.write_local(Characteristic::Continuous, value) {
            log::warn!("Failed to write continuous measurement: {}", e);
        }

        for peer in self.connections.snapshot() {
            if !self.connections.contains(peer) {
                report.disconnected += 1;
                continue;
            }
            match self.transport.notify(peer, Characteristic::Continuous, value) {
                Ok(()) => report.delivered += 1,
                Err(TransportError::Disconnected(_)) => {
                    log::debug!("Peer {} went away before notify", peer);
                    report.disconnected += 1;
                }
                Err(e) => {
                    log::warn!("Error sending notification to {}: {}", peer, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn publish_spot_check(&self, value: &[u8]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let peers = self.connections.snapshot();
        if let Err(e) = self.transport.write_local(Characteristic::SpotCheck, value) {
            log::error!("Failed to write spot-check measurement, skipping indication: {}", e);
            report.failed = peers.len();
            return report;
        }

        let mut waiting: Vec<(PeerId, Receiver<IndicateStatus>)> = Vec::with_capacity(peers.len());
        for peer in peers {
            let (tx, rx) = bounded(1);
            self.pending().insert(peer, tx);

            if !self.connections.contains(peer) {
                self.pending().remove(&peer);
                report.disconnected += 1;
                continue;
            }

            match self.transport.indicate(peer, Characteristic::SpotCheck) {
                Ok(()) => waiting.push((peer, rx)),
                Err(e) => {
                    self.pending().remove(&peer);
                    match e {
                        TransportError::Disconnected(_) => report.disconnected += 1,
                        other => {
                            log::warn!("Error sending indication to {}: {}", peer, other);
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        let deadline = Instant::now() + self.indicate_timeout;
        for (peer, rx) in waiting {
            match rx.recv_deadline(deadline) {
                Ok(IndicateStatus::Acknowledged) => report.delivered += 1,
                Ok(IndicateStatus::Failed) => {
                    log::warn!("Peer {} rejected indication", peer);
                    report.failed += 1;
                }
                Ok(IndicateStatus::Abandoned) | Err(RecvTimeoutError::Disconnected) => {
                    report.disconnected += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.pending().remove(&peer);
                    log::warn!("{} (peer {}), reading dropped", TransportError::Timeout, peer);
                    report.timed_out += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertising::{decode_name, decode_services};
    use crate::connection::ConnectionManager;
    use crate::loopback::{LoopbackTransport, PeerBehaviour, TransportCall};
    use crossbeam_channel::unbounded;
    use std::thread;

    struct Harness {
        transport: Arc<LoopbackTransport>,
        server: Arc<PlxServer<LoopbackTransport>>,
    }

    fn harness(timeout_ms: u64) -> Harness {
        let (event_tx, event_rx) = unbounded();
        let transport = Arc::new(LoopbackTransport::new(event_tx));
        let config = TransportConfig {
            indicate_timeout_ms: timeout_ms,
            ..TransportConfig::default()
        };
        let server = Arc::new(PlxServer::new(transport.clone(), &config).unwrap());
        let manager = ConnectionManager::new(server.clone(), event_rx);
        thread::spawn(move || manager.run());
        Harness { transport, server }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn connect(h: &Harness, peer: PeerId) {
        h.transport.connect(peer);
        wait_for(|| h.server.connections().contains(peer));
    }

    fn advertise_count(h: &Harness) -> usize {
        h.transport
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Advertise { .. }))
            .count()
    }

    #[test]
    fn test_advertising_payload_contents() {
        let h = harness(100);
        let payload = h.server.advertising_payload();
        assert_eq!(decode_name(payload), "PicoW_Oximeter");
        assert_eq!(decode_services(payload), vec![ServiceId::Uuid16(0x1822)]);
    }

    #[test]
    fn test_start_writes_features_and_advertises() {
        let h = harness(100);
        h.server.start().unwrap();
        assert_eq!(
            h.transport.local_value(Characteristic::Features),
            Some(vec![0, 0, 0, 0])
        );
        assert_eq!(advertise_count(&h), 1);
        assert_eq!(h.server.link_state(), LinkState::Advertising);
    }

    #[test]
    fn test_continuous_notifies_every_peer() {
        let h = harness(100);
        connect(&h, 1);
        connect(&h, 2);
        assert_eq!(h.server.link_state(), LinkState::Connected(2));

        let value = plx::encode(98.5, 72.25);
        let report = h.server.publish_continuous(&value);
        assert_eq!(report.delivered, 2);
        assert_eq!(h.transport.local_value(Characteristic::Continuous), Some(value.to_vec()));
        assert_eq!(h.transport.notified(1), vec![value.to_vec()]);
        assert_eq!(h.transport.notified(2), vec![value.to_vec()]);
    }

    #[test]
    fn test_continuous_isolates_failing_peer() {
        let h = harness(100);
        connect(&h, 1);
        connect(&h, 2);
        connect(&h, 3);
        h.transport.set_behaviour(2, PeerBehaviour::FailWrites);

        let report = h.server.publish_continuous(&plx::encode(97.0, 60.0));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(h.transport.notified(3).len(), 1);
    }

    #[test]
    fn test_continuous_with_no_peers_still_writes_local_value() {
        let h = harness(100);
        let value = plx::encode(95.0, 70.0);
        let report = h.server.publish_continuous(&value);
        assert_eq!(report.attempted(), 0);
        assert_eq!(h.transport.local_value(Characteristic::Continuous), Some(value.to_vec()));
    }

    #[test]
    fn test_spot_check_acknowledged() {
        let h = harness(500);
        connect(&h, 7);

        let value = plx::encode(96.0, 65.0);
        let report = h.server.publish_spot_check(&value);
        assert_eq!(report.delivered, 1);
        assert_eq!(h.transport.local_value(Characteristic::SpotCheck), Some(value.to_vec()));
    }

    #[test]
    fn test_spot_check_timeout_is_swallowed() {
        let h = harness(50);
        connect(&h, 1);
        connect(&h, 2);
        h.transport.set_behaviour(2, PeerBehaviour::Ignore);

        let started = Instant::now();
        let report = h.server.publish_spot_check(&plx::encode(96.0, 65.0));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.timed_out, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_disconnect_abandons_indication_and_readvertises() {
        let h = harness(5_000);
        connect(&h, 4);
        h.transport.set_behaviour(4, PeerBehaviour::Ignore);
        let before = advertise_count(&h);

        let server = h.server.clone();
        let publisher = thread::spawn(move || server.publish_spot_check(&plx::encode(96.0, 65.0)));

        wait_for(|| {
            h.transport
                .calls()
                .iter()
                .any(|c| matches!(c, TransportCall::Indicate { peer: 4, .. }))
        });
        h.transport.disconnect(4);

        let report = publisher.join().unwrap();
        assert_eq!(report.disconnected, 1);
        assert_eq!(report.timed_out, 0);
        wait_for(|| advertise_count(&h) == before + 1);
        assert_eq!(h.server.link_state(), LinkState::Advertising);
    }

    #[test]
    fn test_readvertise_only_when_last_peer_leaves() {
        let h = harness(100);
        connect(&h, 1);
        connect(&h, 2);

        h.transport.disconnect(1);
        wait_for(|| !h.server.connections().contains(1));
        assert_eq!(advertise_count(&h), 0);

        h.transport.disconnect(2);
        wait_for(|| advertise_count(&h) == 1);
    }

    #[test]
    fn test_unknown_disconnect_is_ignored() {
        let h = harness(100);
        h.server.handle_event(TransportEvent::Disconnect { peer: 42 });
        assert_eq!(h.server.link_state(), LinkState::Advertising);
    }

    #[test]
    fn test_publish_both_modes() {
        let h = harness(500);
        connect(&h, 1);

        let reading = VitalsEstimate { spo2: 98.0, bpm: 61.0 };
        let report = h.server.publish(&reading, PublishMode::Both);
        assert_eq!(report.delivered, 2);
        assert_eq!(h.transport.notified(1).len(), 1);
    }
}
