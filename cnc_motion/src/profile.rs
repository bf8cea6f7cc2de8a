//! Trapezoid discretization in step-event units.
//!
//! Rates are step events per minute and acceleration is step events per
//! minute². A block of `n` step events is split into accelerate, cruise and
//! decelerate runs whose lengths always add up to exactly `n`.

/// Step-event split of one block (or of the remainder of one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapezoidProfile {
    pub accelerate_steps: u32,
    pub cruise_steps: u32,
    pub decelerate_steps: u32,
}

impl TrapezoidProfile {
    #[inline]
    pub const fn total(&self) -> u32 {
        self.accelerate_steps + self.cruise_steps + self.decelerate_steps
    }

    /// Nominal rate is never reached.
    #[inline]
    pub const fn is_triangular(&self) -> bool {
        self.cruise_steps == 0
    }

    /// Highest rate reached: after `accelerate_steps` from `initial_rate`,
    /// capped by `nominal_rate`.
    pub fn peak_rate(&self, initial_rate: f32, nominal_rate: f32, acceleration: f32) -> f32 {
        let reached = (initial_rate * initial_rate
            + 2.0 * acceleration * self.accelerate_steps as f32)
            .sqrt();
        reached.min(nominal_rate.max(initial_rate))
    }
}

/// Distance needed to change from `initial_rate` to `target_rate` at
/// `acceleration` (negative to decelerate).
#[inline]
pub fn acceleration_distance(initial_rate: f32, target_rate: f32, acceleration: f32) -> f32 {
    (target_rate * target_rate - initial_rate * initial_rate) / (2.0 * acceleration)
}

/// Point at which to stop accelerating and start braking so that a move of
/// `distance` that starts at `initial_rate` ends at `final_rate`.
#[inline]
pub fn intersection_distance(
    initial_rate: f32,
    final_rate: f32,
    acceleration: f32,
    distance: f32,
) -> f32 {
    (2.0 * acceleration * distance - initial_rate * initial_rate + final_rate * final_rate)
        / (4.0 * acceleration)
}

/// Split `step_events` into a trapezoid from `initial_rate` through
/// `nominal_rate` to `final_rate`.
///
/// When `initial_rate` already exceeds `nominal_rate` (feed override lowered
/// mid-block) braking is planned from `initial_rate`, which keeps the exit
/// reachable. Falls back to a triangle when nominal is never reached.
pub fn plan_trapezoid(
    initial_rate: f32,
    nominal_rate: f32,
    final_rate: f32,
    acceleration: f32,
    step_events: u32,
) -> TrapezoidProfile {
    if step_events == 0 || acceleration <= 0.0 {
        return TrapezoidProfile {
            cruise_steps: step_events,
            ..TrapezoidProfile::default()
        };
    }

    let total = step_events as f32;
    let nominal = nominal_rate.max(initial_rate);
    let final_rate = final_rate.min(nominal);

    let accelerate = acceleration_distance(initial_rate, nominal, acceleration)
        .ceil()
        .max(0.0);
    let decelerate = acceleration_distance(nominal, final_rate, -acceleration)
        .floor()
        .max(0.0);
    let plateau = total - accelerate - decelerate;

    if plateau >= 0.0 {
        let accelerate_steps = accelerate as u32;
        let cruise_steps = plateau as u32;
        return TrapezoidProfile {
            accelerate_steps,
            cruise_steps,
            decelerate_steps: step_events - accelerate_steps - cruise_steps,
        };
    }

    let accelerate_steps = intersection_distance(initial_rate, final_rate, acceleration, total)
        .ceil()
        .clamp(0.0, total) as u32;
    TrapezoidProfile {
        accelerate_steps,
        cruise_steps: 0,
        decelerate_steps: step_events - accelerate_steps,
    }
}
