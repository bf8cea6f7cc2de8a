//! State enums shared by the motion core and its collaborators.
//!
//! `MachineState` uses `#[repr(u8)]` so it can live in a single atomic
//! byte read by interrupt contexts.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Machine State ──────────────────────────────────────────────────

/// Single authoritative machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineState {
    /// Ready, no motion queued.
    Idle = 0,
    /// Locked out after an alarm; needs unlock or reset.
    Alarm = 1,
    /// Commands are accepted and checked but nothing moves.
    CheckMode = 2,
    /// Homing cycle in progress.
    Homing = 3,
    /// Executing queued motion.
    Run = 4,
    /// Feed hold: decelerating or stopped, resumable.
    Hold = 5,
    /// Executing jog motion.
    Jog = 6,
    /// Safety door opened.
    Door = 7,
    /// Outputs de-energized; only reset leaves.
    Sleep = 8,
}

impl MachineState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Alarm),
            2 => Some(Self::CheckMode),
            3 => Some(Self::Homing),
            4 => Some(Self::Run),
            5 => Some(Self::Hold),
            6 => Some(Self::Jog),
            7 => Some(Self::Door),
            8 => Some(Self::Sleep),
            _ => None,
        }
    }

    /// Name used in status reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Alarm => "Alarm",
            Self::CheckMode => "Check",
            Self::Homing => "Home",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Door => "Door",
            Self::Sleep => "Sleep",
        }
    }

    /// States in which the pulse engine may be moving.
    #[inline]
    pub const fn is_motion(self) -> bool {
        matches!(self, Self::Run | Self::Jog | Self::Homing)
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::Idle
    }
}

// ─── Spindle / Coolant ──────────────────────────────────────────────

/// Spindle direction command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SpindleState {
    #[default]
    Disable = 0,
    Cw = 1,
    Ccw = 2,
}

impl SpindleState {
    #[inline]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disable)
    }
}

bitflags! {
    /// Coolant outputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoolantState: u8 {
        const FLOOD = 0x01;
        const MIST  = 0x02;
    }
}

impl CoolantState {
    /// Build from the two output booleans.
    #[inline]
    pub fn from_outputs(flood: bool, mist: bool) -> Self {
        let mut state = Self::empty();
        state.set(Self::FLOOD, flood);
        state.set(Self::MIST, mist);
        state
    }
}

impl Default for CoolantState {
    fn default() -> Self {
        Self::empty()
    }
}
