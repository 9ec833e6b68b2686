//! In-process stand-in for the Bluetooth stack.
//!
//! Records every call, keeps the local characteristic values, and lets the
//! caller play the part of connecting centrals. Used by `simulate` mode and
//! by the tests.

use crate::error::TransportError;
use crate::plx::{self, Characteristic};
use crate::transport::{IndicateStatus, PeerId, Transport, TransportEvent};
use crossbeam_channel::Sender;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How a simulated central reacts to writes
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerBehaviour {
    /// Accept notifications and acknowledge indications
    #[default]
    Ack,
    /// Accept notifications, never acknowledge indications
    Ignore,
    /// Reject both notifications and indications with a stack error
    FailWrites,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    WriteLocal { characteristic: Characteristic, value: Vec<u8> },
    Notify { peer: PeerId, characteristic: Characteristic, value: Vec<u8> },
    Indicate { peer: PeerId, characteristic: Characteristic },
    Advertise { payload: Vec<u8>, interval: Duration },
}

#[derive(Default)]
struct LoopbackState {
    calls: Vec<TransportCall>,
    local_values: HashMap<Characteristic, Vec<u8>>,
    linked: BTreeSet<PeerId>,
    #[cfg(test)]
    behaviour: HashMap<PeerId, PeerBehaviour>,
}

pub struct LoopbackTransport {
    events: Sender<TransportEvent>,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new(events: Sender<TransportEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Loopback: no one is listening for link events");
        }
    }

    /// Simulate a central connecting.
    pub fn connect(&self, peer: PeerId) {
        self.state().linked.insert(peer);
        self.emit(TransportEvent::Connect { peer });
    }

    /// Simulate a central dropping the link.
    pub fn disconnect(&self, peer: PeerId) {
        self.state().linked.remove(&peer);
        self.emit(TransportEvent::Disconnect { peer });
    }

    #[cfg(test)]
    pub fn set_behaviour(&self, peer: PeerId, behaviour: PeerBehaviour) {
        self.state().behaviour.insert(peer, behaviour);
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    pub fn local_value(&self, characteristic: Characteristic) -> Option<Vec<u8>> {
        self.state().local_values.get(&characteristic).cloned()
    }

    /// Values notified to `peer`, oldest first
    pub fn notified(&self, peer: PeerId) -> Vec<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Notify { peer: p, value, .. } if *p == peer => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Link check shared by notify and indicate. `Ok(true)` when the peer
    /// will acknowledge an indication.
    fn deliverable(state: &LoopbackState, peer: PeerId) -> Result<bool, TransportError> {
        if !state.linked.contains(&peer) {
            return Err(TransportError::Disconnected(peer));
        }
        #[cfg(test)]
        match state.behaviour.get(&peer).copied().unwrap_or_default() {
            PeerBehaviour::FailWrites => {
                return Err(TransportError::Stack(format!("peer {} rejected the write", peer)));
            }
            PeerBehaviour::Ignore => return Ok(false),
            PeerBehaviour::Ack => {}
        }
        Ok(true)
    }
}

impl Transport for LoopbackTransport {
    fn write_local(
        &self,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::WriteLocal {
            characteristic,
            value: value.to_vec(),
        });
        state.local_values.insert(characteristic, value.to_vec());
        Ok(())
    }

    fn notify(
        &self,
        peer: PeerId,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        Self::deliverable(&state, peer)?;
        state.calls.push(TransportCall::Notify {
            peer,
            characteristic,
            value: value.to_vec(),
        });
        drop(state);

        if let Some(reading) = plx::decode_measurement(value) {
            log::info!(
                "Notify {:?} to {}: SpO2 {:.2}%, Pulse {:.2} bpm",
                characteristic,
                peer,
                reading.spo2,
                reading.bpm
            );
        }
        Ok(())
    }

    fn indicate(&self, peer: PeerId, characteristic: Characteristic) -> Result<(), TransportError> {
        let mut state = self.state();
        let acknowledges = Self::deliverable(&state, peer)?;
        state.calls.push(TransportCall::Indicate {
            peer,
            characteristic,
        });
        drop(state);

        log::info!("Indicate {:?} to {}", characteristic, peer);
        if acknowledges {
            self.emit(TransportEvent::IndicateDone {
                peer,
                status: IndicateStatus::Acknowledged,
            });
        }
        Ok(())
    }

    fn advertise(&self, payload: &[u8], interval: Duration) -> Result<(), TransportError> {
        self.state().calls.push(TransportCall::Advertise {
            payload: payload.to_vec(),
            interval,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_connect_emits_event() {
        let (tx, rx) = unbounded();
        let transport = LoopbackTransport::new(tx);
        transport.connect(3);
        transport.disconnect(3);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connect { peer: 3 });
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Disconnect { peer: 3 });
    }

    #[test]
    fn test_notify_unlinked_peer_fails() {
        let (tx, _rx) = unbounded();
        let transport = LoopbackTransport::new(tx);
        assert_eq!(
            transport.notify(1, Characteristic::Continuous, &[0; 5]),
            Err(TransportError::Disconnected(1))
        );
    }

    #[test]
    fn test_indicate_acknowledges_by_default() {
        let (tx, rx) = unbounded();
        let transport = LoopbackTransport::new(tx);
        transport.connect(2);
        let _ = rx.try_recv();

        transport.indicate(2, Characteristic::SpotCheck).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::IndicateDone {
                peer: 2,
                status: IndicateStatus::Acknowledged
            }
        );
    }

    #[test]
    fn test_failing_peer_rejects_notify_and_indicate() {
        let (tx, rx) = unbounded();
        let transport = LoopbackTransport::new(tx);
        transport.connect(5);
        let _ = rx.try_recv();
        transport.set_behaviour(5, PeerBehaviour::FailWrites);

        assert!(matches!(
            transport.notify(5, Characteristic::Continuous, &[0; 5]),
            Err(TransportError::Stack(_))
        ));
        assert!(matches!(
            transport.indicate(5, Characteristic::SpotCheck),
            Err(TransportError::Stack(_))
        ));
        assert!(transport.notified(5).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ignoring_peer_never_acknowledges() {
        let (tx, rx) = unbounded();
        let transport = LoopbackTransport::new(tx);
        transport.connect(2);
        let _ = rx.try_recv();
        transport.set_behaviour(2, PeerBehaviour::Ignore);

        transport.indicate(2, Characteristic::SpotCheck).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
