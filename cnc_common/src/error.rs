//! Status codes for rejected commands and alarm codes.
//!
//! Status codes are recoverable: the command is refused and nothing in the
//! core changes. Alarms are runtime faults that lock the machine until an
//! unlock or reset.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable command error, with the numeric code shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    #[error("unsupported or invalid statement")]
    InvalidStatement = 3,
    #[error("value must be positive")]
    NegativeValue = 4,
    #[error("setting disabled")]
    SettingDisabled = 5,
    #[error("step pulse must be at least 3 microseconds")]
    StepPulseMin = 6,
    #[error("command requires the machine to be idle")]
    IdleError = 8,
    #[error("machine locked by alarm")]
    SystemLocked = 9,
    #[error("soft limits require homing to be enabled")]
    SoftLimitError = 10,
    #[error("step rate exceeds the maximum")]
    MaxStepRateExceeded = 12,
    #[error("safety door is open")]
    CheckDoor = 13,
    #[error("jog target exceeds machine travel")]
    TravelExceeded = 15,
    #[error("invalid jog command")]
    InvalidJogCommand = 16,
    #[error("laser mode is not supported")]
    SettingDisabledLaser = 17,
}

impl StatusCode {
    /// Numeric code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Runtime alarm.
///
/// CRITICAL alarms (hard limit, soft limit, e-stop) ignore every request
/// except reset until one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(u8)]
pub enum Alarm {
    #[error("hard limit triggered")]
    HardLimit = 1,
    #[error("soft limit exceeded")]
    SoftLimit = 2,
    #[error("reset while in motion, position lost")]
    AbortCycle = 3,
    #[error("homing failed: reset during cycle")]
    HomingFailReset = 6,
    #[error("homing failed: safety door opened")]
    HomingFailDoor = 7,
    #[error("homing failed: limit switch not found")]
    HomingFailApproach = 9,
    #[error("emergency stop asserted")]
    EStop = 10,
}

impl Alarm {
    /// Convert from raw `u8`. Returns `None` for zero and unknown codes.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::HardLimit),
            2 => Some(Self::SoftLimit),
            3 => Some(Self::AbortCycle),
            6 => Some(Self::HomingFailReset),
            7 => Some(Self::HomingFailDoor),
            9 => Some(Self::HomingFailApproach),
            10 => Some(Self::EStop),
            _ => None,
        }
    }

    /// Numeric code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether the alarm requires a fresh reset before anything else is honoured.
    #[inline]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::HardLimit | Self::SoftLimit | Self::EStop)
    }
}
