//! Inbound commands to the control core.
//!
//! These represent actions requested by the outside world (UI routes,
//! schedules, operators) that the
//! [`ControlService`](super::service::ControlService) interprets and acts
//! upon. They are value types; all state lives in the service.

use serde::{Deserialize, Serialize};

use crate::arbiter::ControlSource;

/// What kind of thing a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Panel,
    Group,
}

impl core::fmt::Display for TargetType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Panel => write!(f, "panel"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// A request to set the tint level of a panel or group.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub target_type: TargetType,
    /// Panel id (e.g. `P01`) or group id (e.g. `G-facade`).
    pub target_id: String,
    /// Requested tint level, validated to [0, 100] at submit time.
    pub level: u8,
    /// Who is asking. Group/Routine member lists may be left empty; the
    /// service fills them from the resolved target before claiming.
    pub source: ControlSource,
    /// Revoke equal-or-lower-priority owners instead of conflicting.
    pub force_override: bool,
}

impl CommandRequest {
    /// A direct single-panel command from an operator.
    pub fn manual(panel_id: impl Into<String>, level: u8) -> Self {
        let panel_id = panel_id.into();
        Self {
            target_type: TargetType::Panel,
            target_id: panel_id.clone(),
            level,
            source: ControlSource::Manual { panel_id },
            force_override: false,
        }
    }

    /// A group-wide command.
    pub fn group(group_id: impl Into<String>, level: u8) -> Self {
        let group_id = group_id.into();
        Self {
            target_type: TargetType::Group,
            target_id: group_id.clone(),
            level,
            source: ControlSource::Group {
                group_id,
                members: Vec::new(),
            },
            force_override: false,
        }
    }

    /// A scheduled routine step targeting a panel or group.
    pub fn routine(
        target_type: TargetType,
        target_id: impl Into<String>,
        level: u8,
        routine_id: impl Into<String>,
        name: impl Into<String>,
        step: Option<u32>,
    ) -> Self {
        Self {
            target_type,
            target_id: target_id.into(),
            level,
            source: ControlSource::Routine {
                routine_id: routine_id.into(),
                name: name.into(),
                members: Vec::new(),
                step,
            },
            force_override: false,
        }
    }

    /// Builder-style override flag.
    pub fn with_override(mut self) -> Self {
        self.force_override = true;
        self
    }
}

/// The single result object every submit returns: never a silent no-op,
/// never a stack trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// True when at least one panel changed or was accepted for change.
    pub ok: bool,
    /// Panels whose level change is confirmed applied.
    pub applied_to: Vec<String>,
    /// Human-readable summary distinguishing full success, partial success
    /// (naming skipped panels and why), or full rejection.
    pub message: String,
}

impl CommandResult {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            applied_to: Vec::new(),
            message: message.into(),
        }
    }
}
