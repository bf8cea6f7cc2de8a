//! Operator-facing reports.
//!
//! The controller queues [`Report`]s in a fixed-capacity deque; the
//! transport (here the simulator binary) drains and prints them. Alarms
//! and errors are queued once per occurrence.

use cnc_common::consts::N_AXIS;
use cnc_common::error::{Alarm, StatusCode};
use cnc_common::state::{CoolantState, MachineState};
use serde::{Serialize, Serializer};

use crate::spindle::SpindleStatus;
use crate::state::overrides::Overrides;
use crate::stepper::StepperPhase;

/// Feedback messages.
pub const MSG_RESET_TO_CONTINUE: &str = "Reset to continue";
pub const MSG_UNLOCK: &str = "'$H'|'$X' to unlock";
pub const MSG_CAUTION_UNLOCKED: &str = "Caution: Unlocked";
pub const MSG_ENABLED: &str = "Enabled";
pub const MSG_DISABLED: &str = "Disabled";
pub const MSG_CHECK_DOOR: &str = "Check Door";
pub const MSG_SLEEPING: &str = "Sleeping";

fn serialize_coolant<S: Serializer>(coolant: &CoolantState, s: S) -> Result<S::Ok, S::Error> {
    let mut names = heapless::Vec::<&str, 2>::new();
    if coolant.contains(CoolantState::FLOOD) {
        let _ = names.push("flood");
    }
    if coolant.contains(CoolantState::MIST) {
        let _ = names.push("mist");
    }
    names.serialize(s)
}

/// Status report snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: MachineState,
    /// Machine position [mm].
    pub machine_position: [f32; N_AXIS],
    /// Realtime feed [mm/min].
    pub feed_rate: f32,
    pub spindle: SpindleStatus,
    #[serde(serialize_with = "serialize_coolant")]
    pub coolant: CoolantState,
    pub overrides: Overrides,
    /// Free planner blocks.
    pub planner_blocks_free: usize,
}

/// Debug report: status plus pulse-engine internals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebugReport {
    pub status: StatusReport,
    pub phase: StepperPhase,
    /// Step events per minute.
    pub step_rate: u32,
    pub buffer_head: usize,
    pub buffer_tail: usize,
    pub steppers_enabled: bool,
    pub suspend: u16,
}

/// One queued report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Status(StatusReport),
    Debug(DebugReport),
    Alarm { alarm: Alarm, code: u8 },
    Error { status: StatusCode, code: u8 },
    Feedback { message: &'static str },
    State { state: MachineState },
}

impl Report {
    pub fn alarm(alarm: Alarm) -> Self {
        Self::Alarm {
            alarm,
            code: alarm.code(),
        }
    }

    pub fn error(status: StatusCode) -> Self {
        Self::Error {
            status,
            code: status.code(),
        }
    }

    pub fn feedback(message: &'static str) -> Self {
        Self::Feedback { message }
    }
}
