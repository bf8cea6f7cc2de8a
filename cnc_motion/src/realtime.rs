//! Interrupt-side entry points.
//!
//! [`RealtimeHandle`] is what the serial and pin-change interrupts hold.
//! Every method only raises flags in [`SystemState`]; nothing here blocks,
//! logs or makes a decision that belongs to the main loop. The one
//! exception is reset, which also tells the pulse engine to abort on its
//! next tick.

use std::sync::Arc;

use cnc_common::axis::AxisMask;
use cnc_common::error::Alarm;
use cnc_common::pins::ControlPins;
use cnc_common::realtime::RealtimeCommand;
use cnc_common::state::MachineState;

use crate::system::{AccessoryOverride, ExecState, MotionOverride, SystemState};

/// What became of one received byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteDisposition {
    /// Consumed as a realtime command.
    Realtime(RealtimeCommand),
    /// Unknown extended byte, dropped.
    Discarded,
    /// Ordinary program text for the line buffer.
    Program(u8),
}

/// Cloneable flag-raising handle for interrupt contexts.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    system: Arc<SystemState>,
}

impl RealtimeHandle {
    pub fn new(system: Arc<SystemState>) -> Self {
        Self { system }
    }

    /// Serial receive path: pick realtime bytes out of the stream.
    pub fn dispatch_byte(&self, byte: u8) -> ByteDisposition {
        match RealtimeCommand::from_byte(byte) {
            Some(command) => {
                self.execute(command);
                ByteDisposition::Realtime(command)
            }
            None if byte > 0x7F => ByteDisposition::Discarded,
            None => ByteDisposition::Program(byte),
        }
    }

    /// Raise the flags for one realtime command.
    pub fn execute(&self, command: RealtimeCommand) {
        use RealtimeCommand::*;

        let exec = &self.system.exec_state;
        let motion = &self.system.motion_override;
        let accessory = &self.system.accessory_override;
        match command {
            Reset => self.system.request_reset(),
            StatusReport => exec.set(ExecState::STATUS_REPORT),
            CycleStart => exec.set(ExecState::CYCLE_START),
            FeedHold => exec.set(ExecState::FEED_HOLD),
            SafetyDoor => exec.set(ExecState::SAFETY_DOOR),
            JogCancel => {
                if self.system.state() == MachineState::Jog {
                    exec.set(ExecState::MOTION_CANCEL);
                }
            }
            DebugReport => exec.set(ExecState::DEBUG_REPORT),
            FeedOverrideReset => motion.set(MotionOverride::FEED_RESET),
            FeedOverrideCoarsePlus => motion.set(MotionOverride::FEED_COARSE_PLUS),
            FeedOverrideCoarseMinus => motion.set(MotionOverride::FEED_COARSE_MINUS),
            FeedOverrideFinePlus => motion.set(MotionOverride::FEED_FINE_PLUS),
            FeedOverrideFineMinus => motion.set(MotionOverride::FEED_FINE_MINUS),
            RapidOverrideReset => motion.set(MotionOverride::RAPID_RESET),
            RapidOverrideMedium => motion.set(MotionOverride::RAPID_MEDIUM),
            RapidOverrideLow => motion.set(MotionOverride::RAPID_LOW),
            SpindleOverrideReset => accessory.set(AccessoryOverride::SPINDLE_RESET),
            SpindleOverrideCoarsePlus => accessory.set(AccessoryOverride::SPINDLE_COARSE_PLUS),
            SpindleOverrideCoarseMinus => accessory.set(AccessoryOverride::SPINDLE_COARSE_MINUS),
            SpindleOverrideFinePlus => accessory.set(AccessoryOverride::SPINDLE_FINE_PLUS),
            SpindleOverrideFineMinus => accessory.set(AccessoryOverride::SPINDLE_FINE_MINUS),
            SpindleOverrideStop => accessory.set(AccessoryOverride::SPINDLE_STOP),
            CoolantFloodToggle => accessory.set(AccessoryOverride::FLOOD_TOGGLE),
            CoolantMistToggle => accessory.set(AccessoryOverride::MIST_TOGGLE),
        }
    }

    /// Limit switch change. `tripped` holds the asserted switches.
    pub fn on_limit_pins(&self, tripped: AxisMask) {
        if tripped.is_empty() {
            return;
        }
        if self.system.state() == MachineState::Homing {
            self.system.latch_homing_limits(tripped);
        } else if self.system.hard_limits_enabled() {
            self.system.request_reset();
            self.system.set_alarm(Alarm::HardLimit);
        }
    }

    /// Control input change. `asserted` holds the newly asserted inputs.
    pub fn on_control_pins(&self, asserted: ControlPins) {
        let exec = &self.system.exec_state;
        if asserted.contains(ControlPins::ESTOP) {
            self.system.request_reset();
            self.system.set_alarm(Alarm::EStop);
        } else if asserted.contains(ControlPins::RESET) {
            self.system.request_reset();
        }
        if asserted.contains(ControlPins::SAFETY_DOOR) {
            exec.set(ExecState::SAFETY_DOOR);
        }
        if asserted.contains(ControlPins::FEED_HOLD) {
            exec.set(ExecState::FEED_HOLD);
        }
        if asserted.contains(ControlPins::CYCLE_START) {
            exec.set(ExecState::CYCLE_START);
        }
    }

    pub fn system(&self) -> &Arc<SystemState> {
        &self.system
    }
}
