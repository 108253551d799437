//! Outbound control events.
//!
//! The arbiter and the service publish these to observers that called
//! [`ControlArbiter::subscribe`](crate::arbiter::ControlArbiter::subscribe)
//! or [`ControlService::subscribe`](super::service::ControlService::subscribe).
//! Observers (UI "who controls what" displays, log sinks) receive them over
//! a channel instead of reading shared mutable state.

use crate::arbiter::ControlSource;

/// Structured events emitted by the control core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A source claimed an unclaimed panel.
    Claimed {
        panel_id: String,
        source: ControlSource,
    },
    /// A forced claim revoked the previous owner.
    Overridden {
        panel_id: String,
        previous: ControlSource,
        source: ControlSource,
    },
    /// A panel's ownership record was removed.
    Released { panel_id: String },
    /// A level change was confirmed and committed to the registry.
    LevelCommitted { panel_id: String, level: u8 },
    /// A deferred (accepted-pending) change was confirmed by polling.
    LevelConfirmed { panel_id: String, level: u8 },
    /// A deferred change was not confirmed within the configured window.
    ConfirmTimedOut { panel_id: String },
}
