//! Hardware abstraction consumed by the motion core.
//!
//! The core never touches registers, timers or pins. Every output goes
//! through [`MotionHal`] and every input is polled from it, so the same
//! pulse engine and protocol run against real drivers or against
//! [`crate::sim::SimHal`] on a simulated clock.

use cnc_common::axis::AxisMask;
use cnc_common::pins::ControlPins;
use cnc_common::state::{CoolantState, SpindleState};

/// Output and input operations the motion core needs from a board.
///
/// # Timing
/// - Every call is immediate and non-blocking.
/// - `apply_step_and_direction_bits` is called from the pulse tick and
///   must complete well within one tick period.
pub trait MotionHal {
    /// Drive the step and direction port.
    ///
    /// Both masks are pin levels with the `$2`/`$3` inversion already
    /// applied. A set step bit starts a pulse; the core writes the idle
    /// level again on the next tick.
    fn apply_step_and_direction_bits(&mut self, step: AxisMask, direction: AxisMask);

    /// Drive the stepper enable output. `level` already includes the `$4`
    /// inversion.
    fn set_steppers_enabled(&mut self, level: bool);

    /// Spindle PWM compare value.
    fn set_spindle_speed(&mut self, pwm: u32);

    /// Spindle direction and the speed it was commanded for [rpm].
    fn set_spindle_state(&mut self, state: SpindleState, rpm: f32);

    fn set_coolant(&mut self, coolant: CoolantState);

    /// Tripped limit switches, after the `$5` inversion.
    fn limit_pins(&self) -> AxisMask;

    /// Asserted control inputs.
    fn control_pins(&self) -> ControlPins;
}
