//! Stepper pulse engine.
//!
//! [`Stepper::tick`] is the body of the fixed-rate pulse interrupt. Each
//! tick it:
//!
//! 1. honours `ABORT` (zero every output, discard the ring, go idle),
//! 2. returns the step port to idle level if a pulse went out last tick,
//! 3. loads the next block when none is active (dequeue on load),
//! 4. adds the current rate to the step-event accumulator and, on
//!    overflow, emits one step event with Bresenham interleaving across
//!    the axes,
//! 5. every `pulse_frequency / acceleration_ticks_per_second` ticks,
//!    moves the rate one `rate_delta` along the block's trapezoid, or
//!    toward zero while a feed hold is active.
//!
//! Rates are step events per minute and stay integer inside the tick.
//! Phase boundaries come from [`plan_trapezoid`] and are recomputed when
//! the planner raises the block's exit speed or an override changes.
//!
//! The engine never logs and never allocates.

use std::sync::Arc;

use cnc_common::axis::AxisMask;
use cnc_common::consts::{
    BLOCK_BUFFER_SIZE, MINIMUM_STEP_RATE, N_AXIS, STEPPER_IDLE_LOCK_ALWAYS,
};
use cnc_common::settings::Settings;
use cnc_common::state::{CoolantState, SpindleState};
use serde::Serialize;

use crate::buffer::{BlockCondition, BlockConsumer, MotionBlock, profile_nominal_speed};
use crate::config::PulseTiming;
use crate::hal::MotionHal;
use crate::profile::plan_trapezoid;
use crate::system::{ExecState, StepControl, Suspend, SystemState};

/// What the engine is doing, for debug reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepperPhase {
    Idle,
    Accelerate,
    Cruise,
    Decelerate,
    Hold,
}

/// Engine parameters derived from settings and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperConfig {
    /// Accumulator overflow threshold: ticks per minute.
    pub ticks_per_minute: u32,
    pub ticks_per_acceleration_tick: u32,
    /// Speed updates per minute.
    pub acceleration_ticks_per_minute: f32,
    pub step_invert: AxisMask,
    pub dir_invert: AxisMask,
    pub invert_enable: bool,
    /// Idle ticks before the drivers are disabled; `None` keeps them on.
    pub idle_lock_ticks: Option<u32>,
}

impl StepperConfig {
    pub fn new(settings: &Settings, timing: &PulseTiming) -> Self {
        let idle_lock_ticks = (settings.stepper_idle_lock_time != STEPPER_IDLE_LOCK_ALWAYS)
            .then(|| {
                u32::from(settings.stepper_idle_lock_time) * timing.pulse_frequency_hz / 1000
            });
        Self {
            ticks_per_minute: timing.pulse_frequency_hz * 60,
            ticks_per_acceleration_tick: timing.ticks_per_acceleration_tick(),
            acceleration_ticks_per_minute: timing.acceleration_ticks_per_second as f32 * 60.0,
            step_invert: settings.step_invert(),
            dir_invert: settings.dir_invert(),
            invert_enable: settings.invert_stepper_enable,
            idle_lock_ticks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Off,
    Decelerating,
    /// Stopped mid-program; the active block is kept for resume.
    Complete,
}

/// Working copy of the block being executed.
#[derive(Debug, Clone, Copy)]
struct ActiveBlock {
    steps: [u32; N_AXIS],
    direction: AxisMask,
    step_event_count: u32,
    completed: u32,
    counters: [i64; N_AXIS],
    /// Step events per millimetre along the move.
    events_per_mm: f32,
    /// [steps/min²]
    acceleration: f32,
    /// Rate change per speed update [steps/min].
    rate_delta: u32,
    nominal_speed: f32,
    rapid_rate: f32,
    condition: BlockCondition,
    nominal_rate: u32,
    final_rate: u32,
    accelerate_until: u32,
    decelerate_after: u32,
    // Inputs of the last replan.
    planned_exit_sqr: f32,
    planned_feed_override: u8,
    planned_rapid_override: u8,
}

impl ActiveBlock {
    fn load(block: &MotionBlock, config: &StepperConfig) -> Self {
        let n = block.step_event_count;
        let events_per_mm = n as f32 / block.millimeters;
        let acceleration = block.acceleration * events_per_mm;
        let rate_delta = (acceleration / config.acceleration_ticks_per_minute).ceil() as u32;
        let half = i64::from(n >> 1);
        Self {
            steps: block.steps,
            direction: block.direction,
            step_event_count: n,
            completed: 0,
            counters: [-half; N_AXIS],
            events_per_mm,
            acceleration,
            rate_delta: rate_delta.max(1),
            nominal_speed: block.nominal_speed,
            rapid_rate: block.rapid_rate,
            condition: block.condition,
            nominal_rate: 0,
            final_rate: 0,
            accelerate_until: 0,
            decelerate_after: 0,
            planned_exit_sqr: f32::NAN,
            planned_feed_override: 0,
            planned_rapid_override: 0,
        }
    }

    /// Nominal speed with overrides applied [mm/min].
    fn effective_nominal_speed(&self, feed_override: u8, rapid_override: u8) -> f32 {
        profile_nominal_speed(
            self.nominal_speed,
            self.rapid_rate,
            self.condition,
            feed_override,
            rapid_override,
        )
    }

    /// Recompute phase boundaries for the remaining step events from `rate`.
    fn replan(&mut self, rate: u32, exit_sqr: f32, feed: u8, rapid: u8, max_rate: u32) {
        let nominal = self.effective_nominal_speed(feed, rapid) * self.events_per_mm;
        self.nominal_rate = (nominal.ceil() as u32).clamp(MINIMUM_STEP_RATE, max_rate);
        self.final_rate =
            ((exit_sqr.max(0.0).sqrt() * self.events_per_mm).ceil() as u32).min(self.nominal_rate);

        let remaining = self.step_event_count - self.completed;
        let profile = plan_trapezoid(
            rate as f32,
            self.nominal_rate as f32,
            self.final_rate as f32,
            self.acceleration,
            remaining,
        );
        self.accelerate_until = self.completed + profile.accelerate_steps;
        self.decelerate_after = self.accelerate_until + profile.cruise_steps;

        self.planned_exit_sqr = exit_sqr;
        self.planned_feed_override = feed;
        self.planned_rapid_override = rapid;
    }

    fn needs_replan(&self, exit_sqr: f32, feed: u8, rapid: u8) -> bool {
        exit_sqr != self.planned_exit_sqr
            || feed != self.planned_feed_override
            || rapid != self.planned_rapid_override
    }

    fn phase(&self) -> StepperPhase {
        if self.completed < self.accelerate_until {
            StepperPhase::Accelerate
        } else if self.completed >= self.decelerate_after {
            StepperPhase::Decelerate
        } else {
            StepperPhase::Cruise
        }
    }

    /// One speed update along the trapezoid.
    fn next_rate(&self, rate: u32) -> u32 {
        match self.phase() {
            StepperPhase::Accelerate => (rate + self.rate_delta).min(self.nominal_rate),
            StepperPhase::Decelerate if rate > self.final_rate => rate
                .saturating_sub(self.rate_delta)
                .max(self.final_rate),
            StepperPhase::Decelerate => rate,
            // Cruise, or converging on a nominal moved by an override.
            _ if rate < self.nominal_rate => (rate + self.rate_delta).min(self.nominal_rate),
            _ => rate.saturating_sub(self.rate_delta).max(self.nominal_rate),
        }
    }
}

/// The pulse engine. Owns the consumer end of the segment buffer.
pub struct Stepper<const N: usize = BLOCK_BUFFER_SIZE> {
    consumer: BlockConsumer<N>,
    system: Arc<SystemState>,
    config: StepperConfig,
    block: Option<ActiveBlock>,
    /// Current step-event rate [steps/min].
    rate: u32,
    /// Speed carried from the previous block into the next [mm/min].
    carry_speed: f32,
    event_accumulator: u32,
    acceleration_tick_counter: u32,
    awake: bool,
    hold: Hold,
    pulse_active: bool,
    dir_level: AxisMask,
    steppers_enabled: bool,
    idle_ticks: u32,
    aborted: bool,
}

impl<const N: usize> Stepper<N> {
    pub fn new(consumer: BlockConsumer<N>, system: Arc<SystemState>, config: StepperConfig) -> Self {
        Self {
            consumer,
            system,
            dir_level: config.dir_invert,
            config,
            block: None,
            rate: 0,
            carry_speed: 0.0,
            event_accumulator: 0,
            acceleration_tick_counter: 0,
            awake: false,
            hold: Hold::Off,
            pulse_active: false,
            steppers_enabled: false,
            idle_ticks: 0,
            aborted: false,
        }
    }

    /// Drive the outputs to their idle levels at power-up.
    pub fn power_on<H: MotionHal>(&mut self, hal: &mut H) {
        hal.apply_step_and_direction_bits(self.config.step_invert, self.dir_level);
        let keep_enabled = self.config.idle_lock_ticks.is_none();
        self.set_enabled(hal, keep_enabled);
    }

    /// One pulse interrupt.
    pub fn tick<H: MotionHal>(&mut self, hal: &mut H) {
        let control = self.system.step_control.load();
        if control.contains(StepControl::ABORT) {
            self.abort(hal);
            return;
        }

        if self.pulse_active {
            hal.apply_step_and_direction_bits(self.config.step_invert, self.dir_level);
            self.pulse_active = false;
        }

        if !self.awake {
            self.idle_tick(hal);
            return;
        }

        if control.contains(StepControl::EXECUTE_HOLD) && self.hold == Hold::Off {
            self.hold = Hold::Decelerating;
        }

        if self.block.is_none() && !self.load_block(hal) {
            // Queue drained.
            self.rate = 0;
            self.carry_speed = 0.0;
            if self.hold == Hold::Decelerating {
                self.hold = Hold::Complete;
                self.system.suspend.set(Suspend::HOLD_COMPLETE);
            }
            self.go_idle();
            self.system.exec_state.set(ExecState::CYCLE_STOP);
            return;
        }

        let step_rate = self.rate.max(MINIMUM_STEP_RATE);
        self.event_accumulator += step_rate;
        if self.event_accumulator >= self.config.ticks_per_minute {
            self.event_accumulator -= self.config.ticks_per_minute;
            self.step_event(hal);
        }

        self.acceleration_tick_counter += 1;
        if self.acceleration_tick_counter >= self.config.ticks_per_acceleration_tick {
            self.acceleration_tick_counter = 0;
            self.update_rate();
        }
    }

    /// Start executing queued blocks (cycle start from idle).
    pub fn wake_up<H: MotionHal>(&mut self, hal: &mut H) {
        if self.hold != Hold::Off {
            return;
        }
        self.awake = true;
        self.idle_ticks = 0;
        self.set_enabled(hal, true);
    }

    /// Leave a completed hold and continue from standstill, if anything
    /// is left to run.
    pub fn resume<H: MotionHal>(&mut self, hal: &mut H) {
        self.hold = Hold::Off;
        self.rate = 0;
        self.carry_speed = 0.0;
        self.event_accumulator = 0;
        if let Some(block) = self.block.as_mut() {
            let exit_sqr = self
                .consumer
                .executing()
                .map_or(0.0, MotionBlock::exit_speed_sqr);
            block.replan(
                0,
                exit_sqr,
                self.system.feed_override(),
                self.system.rapid_override(),
                self.config.ticks_per_minute,
            );
        }
        if self.has_pending_motion() {
            self.wake_up(hal);
        }
    }

    /// Drop the active block and everything queued, without touching the
    /// spindle or coolant. Used to flush a cancelled jog once stopped.
    pub fn flush(&mut self) {
        self.consumer.discard_all();
        self.clear_motion();
    }

    /// Return to power-up state after a soft reset. Outputs go to idle.
    pub fn reset<H: MotionHal>(&mut self, hal: &mut H) {
        self.consumer.discard_all();
        self.clear_motion();
        self.pulse_active = false;
        self.dir_level = self.config.dir_invert;
        hal.apply_step_and_direction_bits(self.config.step_invert, self.dir_level);
        self.aborted = false;
    }

    /// Disable the drivers regardless of the idle lock setting (sleep).
    pub fn disable_drivers<H: MotionHal>(&mut self, hal: &mut H) {
        self.set_enabled(hal, false);
    }

    pub fn update_config(&mut self, config: StepperConfig) {
        self.config = config;
        self.dir_level = config.dir_invert;
    }

    pub fn phase(&self) -> StepperPhase {
        if self.hold != Hold::Off {
            return StepperPhase::Hold;
        }
        match (&self.block, self.awake) {
            (Some(block), true) => block.phase(),
            _ => StepperPhase::Idle,
        }
    }

    /// No block loaded and not running.
    pub fn is_idle(&self) -> bool {
        !self.awake && self.block.is_none()
    }

    /// Motion remains: an active block or queued blocks.
    pub fn has_pending_motion(&self) -> bool {
        self.block.is_some() || !self.consumer.is_empty()
    }

    /// Distance left in the active block [mm].
    pub fn remaining_millimeters(&self) -> f32 {
        self.block.as_ref().map_or(0.0, |b| {
            (b.step_event_count - b.completed) as f32 / b.events_per_mm
        })
    }

    /// Current step-event rate [steps/min].
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Ring indices `(head, tail)`.
    pub fn buffer_indices(&self) -> (usize, usize) {
        self.consumer.indices()
    }

    pub fn steppers_enabled(&self) -> bool {
        self.steppers_enabled
    }

    // ── Tick internals ──

    fn load_block<H: MotionHal>(&mut self, hal: &mut H) -> bool {
        if !self.consumer.dequeue_head() {
            return false;
        }
        let Some(block) = self.consumer.executing() else {
            return false;
        };
        let mut active = ActiveBlock::load(block, &self.config);
        let exit_sqr = block.exit_speed_sqr();

        self.rate = (self.carry_speed * active.events_per_mm).round() as u32;
        self.rate = self.rate.min(self.config.ticks_per_minute);
        active.replan(
            self.rate,
            exit_sqr,
            self.system.feed_override(),
            self.system.rapid_override(),
            self.config.ticks_per_minute,
        );

        self.dir_level = active.direction ^ self.config.dir_invert;
        self.block = Some(active);
        self.set_enabled(hal, true);
        true
    }

    fn step_event<H: MotionHal>(&mut self, hal: &mut H) {
        let Some(block) = self.block.as_mut() else {
            return;
        };

        let mut step_bits = AxisMask::empty();
        let n = i64::from(block.step_event_count);
        for axis in 0..N_AXIS {
            block.counters[axis] += i64::from(block.steps[axis]);
            if block.counters[axis] > 0 {
                block.counters[axis] -= n;
                step_bits |= AxisMask::axis(axis);
                self.system
                    .step_axis(axis, block.direction.has_axis(axis));
            }
        }
        hal.apply_step_and_direction_bits(step_bits ^ self.config.step_invert, self.dir_level);
        self.pulse_active = true;

        block.completed += 1;
        if block.completed >= block.step_event_count {
            self.carry_speed = self.rate as f32 / block.events_per_mm;
            self.block = None;
            self.consumer.finish_executing();
        }
    }

    fn update_rate(&mut self) {
        let Some(block) = self.block.as_mut() else {
            return;
        };

        match self.hold {
            Hold::Decelerating => {
                if self.rate <= block.rate_delta {
                    self.rate = 0;
                    self.hold = Hold::Complete;
                    self.system.set_realtime_rate(0.0);
                    self.system.suspend.set(Suspend::HOLD_COMPLETE);
                    self.system.exec_state.set(ExecState::CYCLE_STOP);
                    self.go_idle();
                    return;
                }
                self.rate -= block.rate_delta;
            }
            Hold::Off => {
                let exit_sqr = self
                    .consumer
                    .executing()
                    .map_or(0.0, MotionBlock::exit_speed_sqr);
                let feed = self.system.feed_override();
                let rapid = self.system.rapid_override();
                if block.needs_replan(exit_sqr, feed, rapid) {
                    block.replan(self.rate, exit_sqr, feed, rapid, self.config.ticks_per_minute);
                }
                self.rate = block.next_rate(self.rate);
            }
            Hold::Complete => return,
        }
        self.system
            .set_realtime_rate(self.rate as f32 / block.events_per_mm);
    }

    fn go_idle(&mut self) {
        self.awake = false;
        self.idle_ticks = 0;
        self.event_accumulator = 0;
        self.acceleration_tick_counter = 0;
        if self.hold != Hold::Complete {
            self.system.set_realtime_rate(0.0);
        }
    }

    fn idle_tick<H: MotionHal>(&mut self, hal: &mut H) {
        if !self.steppers_enabled {
            return;
        }
        let Some(lock_ticks) = self.config.idle_lock_ticks else {
            return;
        };
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks >= lock_ticks {
            self.set_enabled(hal, false);
        }
    }

    fn set_enabled<H: MotionHal>(&mut self, hal: &mut H, enabled: bool) {
        if self.steppers_enabled == enabled && enabled {
            return;
        }
        self.steppers_enabled = enabled;
        hal.set_steppers_enabled(enabled != self.config.invert_enable);
    }

    fn abort<H: MotionHal>(&mut self, hal: &mut H) {
        if self.aborted {
            return;
        }
        hal.apply_step_and_direction_bits(self.config.step_invert, self.config.dir_invert);
        hal.set_spindle_state(SpindleState::Disable, 0.0);
        hal.set_spindle_speed(0);
        hal.set_coolant(CoolantState::empty());

        self.consumer.discard_all();
        self.clear_motion();
        self.pulse_active = false;
        self.dir_level = self.config.dir_invert;
        self.aborted = true;
    }

    fn clear_motion(&mut self) {
        self.block = None;
        self.rate = 0;
        self.carry_speed = 0.0;
        self.hold = Hold::Off;
        self.go_idle();
        self.system.set_realtime_rate(0.0);
    }
}
