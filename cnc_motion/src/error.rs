//! Errors returned by the controller's producer-side operations.

use cnc_common::error::{Alarm, StatusCode};
use thiserror::Error;

/// Why a controller request was refused or cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Recoverable command error; nothing changed.
    #[error("error {}: {}", .0.code(), .0)]
    Status(#[from] StatusCode),

    /// A reset arrived while the request was waiting.
    #[error("aborted by reset")]
    Aborted,

    /// A critical alarm is latched until reset.
    #[error("locked by alarm {}: {}", .0.code(), .0)]
    Locked(Alarm),
}

impl ControlError {
    /// Status code to show the operator, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Locked(_) => Some(StatusCode::SystemLocked),
            Self::Aborted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_codes() {
        let err = ControlError::from(StatusCode::IdleError);
        assert_eq!(err.to_string(), "error 8: command requires the machine to be idle");
        let err = ControlError::Locked(Alarm::HardLimit);
        assert_eq!(err.to_string(), "locked by alarm 1: hard limit triggered");
        assert_eq!(err.status_code(), Some(StatusCode::SystemLocked));
    }
}
