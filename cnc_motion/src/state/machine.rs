//! Machine state transitions.
//!
//! Idle ↔ Run/Jog/Homing, Run ↔ Hold, any → Door/Sleep/Alarm, reset → Idle
//! or Alarm. Guards that need more than the current state (door switch,
//! queued motion, latched alarms) are checked by the protocol before the
//! event is raised here.

use cnc_common::state::MachineState;

/// Result of a MachineState transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, with the new state.
    Ok(MachineState),
    /// Transition rejected, with the reason.
    Rejected(&'static str),
}

/// Event that can trigger a machine state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    /// Cycle start with motion to run or resume.
    CycleStart,
    /// Feed hold requested.
    FeedHold,
    /// Safety door opened.
    DoorOpened,
    /// Door closed and cycle start received.
    DoorResume,
    /// Queue drained and pulse engine stopped.
    MotionComplete,
    /// Jog motion queued.
    JogStart,
    /// Homing cycle begins.
    HomingStart,
    /// Homing cycle finished successfully.
    HomingComplete,
    /// Alarm raised.
    Alarm,
    /// `$X` alarm unlock.
    Unlock,
    /// `$C` check mode toggle.
    ToggleCheckMode,
    /// Sleep requested.
    Sleep,
    /// Soft reset; `locked` when an alarm must survive the reset.
    Reset { locked: bool },
}

/// Holds the single authoritative machine state.
#[derive(Debug, Clone)]
pub struct ProtocolStateMachine {
    state: MachineState,
}

impl ProtocolStateMachine {
    /// Power-up state: Idle, or Alarm when the position is unknown.
    pub const fn new(locked: bool) -> Self {
        Self {
            state: if locked {
                MachineState::Alarm
            } else {
                MachineState::Idle
            },
        }
    }

    #[inline]
    pub const fn state(&self) -> MachineState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: MachineEvent) -> TransitionResult {
        use MachineEvent::*;
        use MachineState::*;

        let next = match (self.state, event) {
            // Reset and alarms apply everywhere.
            (_, Reset { locked: true }) => MachineState::Alarm,
            (_, Reset { locked: false }) => Idle,
            (_, MachineEvent::Alarm) => MachineState::Alarm,

            (Idle, CycleStart) | (Hold, CycleStart) => Run,

            (Idle, FeedHold) | (Run, FeedHold) => Hold,
            // Jog cancel: stays in Jog until the queue is flushed.
            (Jog, FeedHold) => Jog,

            (Idle, DoorOpened) | (Run, DoorOpened) | (Hold, DoorOpened) | (Jog, DoorOpened) => {
                Door
            }
            (Door, DoorOpened) => Door,
            (Door, DoorResume) => Run,

            (Run, MotionComplete) | (Jog, MotionComplete) => Idle,

            (Idle, JogStart) | (Jog, JogStart) => Jog,

            (Idle, HomingStart) | (MachineState::Alarm, HomingStart) => Homing,
            (Homing, HomingComplete) => Idle,

            (MachineState::Alarm, Unlock) => Idle,

            (Idle, ToggleCheckMode) => CheckMode,
            (CheckMode, ToggleCheckMode) => Idle,

            (state, MachineEvent::Sleep) if !matches!(state, MachineState::Sleep | Homing) => {
                MachineState::Sleep
            }

            _ => {
                return TransitionResult::Rejected(invalid_transition_reason(self.state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Whether program motion may be queued.
    #[inline]
    pub const fn accepts_motion(&self) -> bool {
        matches!(
            self.state,
            MachineState::Idle
                | MachineState::Run
                | MachineState::Hold
                | MachineState::CheckMode
                | MachineState::Door
                | MachineState::Jog
        )
    }

    /// Whether the machine is locked out until unlock or reset.
    #[inline]
    pub const fn is_locked(&self) -> bool {
        matches!(self.state, MachineState::Alarm | MachineState::Sleep)
    }
}

fn invalid_transition_reason(state: MachineState, event: MachineEvent) -> &'static str {
    use MachineEvent::*;
    match (state, event) {
        (MachineState::Alarm, _) => "Alarm: only unlock, homing or reset allowed",
        (MachineState::Sleep, _) => "Sleep: only reset allowed",
        (MachineState::Homing, _) => "Homing: only completion, alarm or reset allowed",
        (_, Unlock) => "Unlock only applies in Alarm",
        (_, ToggleCheckMode) => "Check mode toggles only from Idle",
        (_, JogStart) => "Jog requires Idle or Jog",
        (_, HomingStart) => "Homing requires Idle or Alarm",
        (_, DoorResume) => "Door resume only applies in Door",
        (_, CycleStart) => "Cycle start only applies in Idle or Hold",
        _ => "invalid event for current state",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
