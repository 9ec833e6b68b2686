//! # Transport Interface
//!
//! The Bluetooth stack is an external collaborator. It tracks connections,
//! pushes notifications and indications, and reports what happens on the
//! link as `TransportEvent`s.

use crate::error::TransportError;
use crate::plx::Characteristic;
use std::time::Duration;

/// Connection handle assigned by the stack
pub type PeerId = u16;

/// Outcome reported by the stack for one indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicateStatus {
    Acknowledged,
    Failed,
    /// Peer disconnected before acknowledging
    Abandoned,
}

/// Link events delivered by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect { peer: PeerId },
    Disconnect { peer: PeerId },
    IndicateDone { peer: PeerId, status: IndicateStatus },
}

pub trait Transport: Send + Sync {
    /// Store `value` as the characteristic's local value.
    fn write_local(
        &self,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Unconfirmed push of `value` to `peer`.
    fn notify(
        &self,
        peer: PeerId,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Start a confirmed push of the local value to `peer`. Completion is
    /// reported later as `TransportEvent::IndicateDone`.
    fn indicate(&self, peer: PeerId, characteristic: Characteristic) -> Result<(), TransportError>;

    /// (Re)start broadcasting `payload` every `interval`.
    fn advertise(&self, payload: &[u8], interval: Duration) -> Result<(), TransportError>;
}
