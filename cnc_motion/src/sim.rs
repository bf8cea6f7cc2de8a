//! Simulated board.
//!
//! `SimHal` implements [`MotionHal`] in memory: it counts step pulses per
//! axis, integrates them into a signed position, records every output
//! write and exposes settable limit and control inputs. Used by the
//! simulator binary, the integration tests and the benches.

use cnc_common::axis::AxisMask;
use cnc_common::consts::N_AXIS;
use cnc_common::pins::ControlPins;
use cnc_common::state::{CoolantState, SpindleState};

use crate::hal::MotionHal;

/// In-memory board with pulse counting.
#[derive(Debug, Clone, Default)]
pub struct SimHal {
    step_invert: AxisMask,
    dir_invert: AxisMask,
    step_level: AxisMask,
    dir_level: AxisMask,
    /// Rising edges per axis.
    pulses: [u64; N_AXIS],
    /// Signed steps per axis.
    position: [i64; N_AXIS],
    /// Writes that changed the step/direction port.
    port_changes: u64,
    enable_level: bool,
    spindle_state: SpindleState,
    spindle_rpm: f32,
    spindle_pwm: u32,
    coolant: CoolantState,
    limit_pins: AxisMask,
    control_pins: ControlPins,
}

impl SimHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the port inversion the pulse engine applies, so pulses are
    /// counted on the active edge.
    pub fn with_invert(step_invert: AxisMask, dir_invert: AxisMask) -> Self {
        Self {
            step_invert,
            dir_invert,
            step_level: step_invert,
            dir_level: dir_invert,
            ..Self::default()
        }
    }

    /// Step pulses emitted per axis.
    pub fn pulses(&self) -> [u64; N_AXIS] {
        self.pulses
    }

    /// Sum of pulses over all axes.
    pub fn total_pulses(&self) -> u64 {
        self.pulses.iter().sum()
    }

    /// Net steps per axis, negative for pulses with the direction bit set.
    pub fn position(&self) -> [i64; N_AXIS] {
        self.position
    }

    /// Number of writes that changed the step/direction port.
    pub fn port_changes(&self) -> u64 {
        self.port_changes
    }

    /// Current step port level.
    pub fn step_level(&self) -> AxisMask {
        self.step_level
    }

    pub fn enable_level(&self) -> bool {
        self.enable_level
    }

    pub fn spindle_state(&self) -> SpindleState {
        self.spindle_state
    }

    pub fn spindle_rpm(&self) -> f32 {
        self.spindle_rpm
    }

    pub fn spindle_pwm(&self) -> u32 {
        self.spindle_pwm
    }

    pub fn coolant(&self) -> CoolantState {
        self.coolant
    }

    pub fn set_limit_pins(&mut self, pins: AxisMask) {
        self.limit_pins = pins;
    }

    pub fn set_control_pins(&mut self, pins: ControlPins) {
        self.control_pins = pins;
    }
}

impl MotionHal for SimHal {
    fn apply_step_and_direction_bits(&mut self, step: AxisMask, direction: AxisMask) {
        if step != self.step_level || direction != self.dir_level {
            self.port_changes += 1;
        }
        let active = step ^ self.step_invert;
        let rising = active & !(self.step_level ^ self.step_invert);
        let reverse = direction ^ self.dir_invert;
        for axis in 0..N_AXIS {
            if rising.has_axis(axis) {
                self.pulses[axis] += 1;
                self.position[axis] += if reverse.has_axis(axis) { -1 } else { 1 };
            }
        }
        self.step_level = step;
        self.dir_level = direction;
    }

    fn set_steppers_enabled(&mut self, level: bool) {
        self.enable_level = level;
    }

    fn set_spindle_speed(&mut self, pwm: u32) {
        self.spindle_pwm = pwm;
    }

    fn set_spindle_state(&mut self, state: SpindleState, rpm: f32) {
        self.spindle_state = state;
        self.spindle_rpm = rpm;
    }

    fn set_coolant(&mut self, coolant: CoolantState) {
        self.coolant = coolant;
    }

    fn limit_pins(&self) -> AxisMask {
        self.limit_pins
    }

    fn control_pins(&self) -> ControlPins {
        self.control_pins
    }
}
