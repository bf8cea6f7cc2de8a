//! Look-ahead velocity planner.
//!
//! Turns straight-line moves into [`MotionBlock`]s, queues them on the
//! producer end of the segment buffer and replans entry/exit speeds over
//! everything not yet executed.
//!
//! Speeds are planned squared [mm²/min²] so neither pass needs a square
//! root. A block can change speed by at most `2·a·d` in squared speed over
//! its length `d`.
//!
//! ## Passes
//!
//! 1. Reverse (newest → oldest): the newest block must be able to stop
//!    at its end, so every entry is capped by what braking from the next
//!    entry allows, plus the block's own `max_entry_speed_sqr`.
//! 2. Forward (oldest → newest, starting at the executing block): every
//!    entry is capped by what accelerating from the previous entry
//!    allows, and each exit is set to the following entry.
//!
//! The executing block's entry speed is never rewritten. Only its exit
//! speed is refined, and appending blocks can only raise that exit.

use std::sync::Arc;

use cnc_common::axis::AxisMask;
use cnc_common::consts::{
    BLOCK_BUFFER_SIZE, MINIMUM_FEED_RATE, MINIMUM_JUNCTION_SPEED, N_AXIS, SOME_LARGE_VALUE,
};
use cnc_common::settings::Settings;
use portable_atomic::AtomicF32;
use tracing::{debug, warn};

use crate::buffer::{BlockCondition, BlockProducer, MotionBlock, profile_nominal_speed};
use crate::system::SystemState;

/// Cosine threshold beyond which a junction counts as straight or reversing.
const JUNCTION_COS_LIMIT: f32 = 0.999_999;

/// Outcome of handing a move to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// Block queued and planned.
    Queued,
    /// Move shorter than one step on every axis; nothing queued.
    Empty,
    /// Ring full; nothing changed. Retry once the pulse engine frees a slot.
    Full,
    /// Target not finite or beyond the step counter range; nothing queued.
    OutOfRange,
}

/// Feed parameters for a move given as an absolute target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanLine {
    /// Programmed feed rate [mm/min]. Ignored for rapid moves.
    pub feed_rate: f32,
    pub condition: BlockCondition,
}

/// A move already decomposed into signed per-axis step deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRequest {
    /// Signed step delta per axis.
    pub steps: [i32; N_AXIS],
    /// Requested speed [mm/min]. Capped by the axis rate limits.
    pub nominal_speed: f32,
    /// Requested acceleration [mm/min²]; `None` uses the axis limits.
    pub acceleration: Option<f32>,
    /// Cosine of the angle between the previous and this move's direction,
    /// when the caller already knows it.
    pub junction_cos: Option<f32>,
    pub condition: BlockCondition,
}

/// Axis limits the planner works with, in planner units.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisLimits {
    steps_per_mm: [f32; N_AXIS],
    /// [mm/min]
    max_rate: [f32; N_AXIS],
    /// [mm/min²]
    acceleration: [f32; N_AXIS],
    junction_deviation: f32,
}

impl AxisLimits {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            steps_per_mm: settings.steps_per_mm(),
            max_rate: settings.axes.map(|a| a.max_rate),
            acceleration: settings.axes.map(|a| a.acceleration_mm_per_min2()),
            junction_deviation: settings.junction_deviation,
        }
    }
}

/// Largest scalar along `unit_vec` that keeps every axis within `max`.
fn limit_value_by_axis_maximum(max: &[f32; N_AXIS], unit_vec: &[f32; N_AXIS]) -> f32 {
    max.iter()
        .zip(unit_vec)
        .filter(|(_, u)| **u != 0.0)
        .map(|(m, u)| (m / u).abs())
        .fold(SOME_LARGE_VALUE, f32::min)
}

/// Squared junction speed limit for a turn with cosine `junction_cos`
/// (of the angle between the reversed previous direction and the new one).
pub fn junction_speed_sqr(junction_cos: f32, acceleration: f32, junction_deviation: f32) -> f32 {
    let min_sqr = MINIMUM_JUNCTION_SPEED * MINIMUM_JUNCTION_SPEED;
    if junction_cos > JUNCTION_COS_LIMIT {
        // Full reversal.
        return min_sqr;
    }
    if junction_cos < -JUNCTION_COS_LIMIT {
        // Straight through.
        return SOME_LARGE_VALUE;
    }
    let sin_theta_d2 = (0.5 * (1.0 - junction_cos)).sqrt();
    min_sqr.max(acceleration * junction_deviation * sin_theta_d2 / (1.0 - sin_theta_d2))
}

/// Main-loop planner. Owns the producer end of the segment buffer.
pub struct Planner<const N: usize = BLOCK_BUFFER_SIZE> {
    producer: BlockProducer<N>,
    system: Arc<SystemState>,
    limits: AxisLimits,
    /// Planned position [steps]; ahead of the machine by the queued moves.
    position: [i32; N_AXIS],
    previous_unit_vec: [f32; N_AXIS],
    previous_nominal_speed: f32,
    /// Executing block resumed from standstill: (load sequence, remaining mm).
    partial: Option<(u32, f32)>,
}

impl<const N: usize> Planner<N> {
    pub fn new(producer: BlockProducer<N>, system: Arc<SystemState>, settings: &Settings) -> Self {
        let position = system.position();
        Self {
            producer,
            system,
            limits: AxisLimits::from_settings(settings),
            position,
            previous_unit_vec: [0.0; N_AXIS],
            previous_nominal_speed: 0.0,
            partial: None,
        }
    }

    /// Plan a straight move from the planned position to `target` [mm].
    ///
    /// Targets that are not finite or fall outside the step counter range
    /// are refused with [`Submit::OutOfRange`].
    pub fn buffer_line(&mut self, target: &[f32; N_AXIS], line: PlanLine) -> Submit {
        let mut steps = [0_i32; N_AXIS];
        for axis in 0..N_AXIS {
            let target_steps = f64::from(target[axis]) * f64::from(self.limits.steps_per_mm[axis]);
            let delta = target_steps.round() - f64::from(self.position[axis]);
            if !delta.is_finite() || delta.abs() > f64::from(i32::MAX) {
                warn!(axis, target = target[axis], "Target out of step range, move refused");
                return Submit::OutOfRange;
            }
            steps[axis] = delta as i32;
        }
        self.submit_block(BlockRequest {
            steps,
            nominal_speed: line.feed_rate,
            acceleration: None,
            junction_cos: None,
            condition: line.condition,
        })
    }

    /// Queue a move given as step deltas and replan.
    pub fn submit_block(&mut self, request: BlockRequest) -> Submit {
        let magnitudes = request.steps.map(i32::unsigned_abs);
        let step_event_count = magnitudes.iter().copied().max().unwrap_or(0);
        if step_event_count == 0 {
            return Submit::Empty;
        }
        if self.producer.is_full() {
            return Submit::Full;
        }

        let mut direction = AxisMask::empty();
        let mut unit_vec = [0.0_f32; N_AXIS];
        for axis in 0..N_AXIS {
            if request.steps[axis] < 0 {
                direction |= AxisMask::axis(axis);
            }
            unit_vec[axis] = request.steps[axis] as f32 / self.limits.steps_per_mm[axis];
        }
        let millimeters = unit_vec.iter().map(|d| d * d).sum::<f32>().sqrt();
        for component in &mut unit_vec {
            *component /= millimeters;
        }

        let axis_acceleration = limit_value_by_axis_maximum(&self.limits.acceleration, &unit_vec);
        let acceleration = request
            .acceleration
            .map_or(axis_acceleration, |a| a.min(axis_acceleration));
        let rapid_rate = limit_value_by_axis_maximum(&self.limits.max_rate, &unit_vec);
        let nominal_speed = if request.condition.contains(BlockCondition::RAPID) {
            rapid_rate
        } else {
            request.nominal_speed.min(rapid_rate).max(MINIMUM_FEED_RATE)
        };

        // From standstill the first block must start at zero.
        let from_rest = self.producer.is_empty() && self.producer.executing().is_none();
        let max_junction_speed_sqr = if from_rest {
            0.0
        } else {
            let junction_cos = request.junction_cos.unwrap_or_else(|| {
                -self
                    .previous_unit_vec
                    .iter()
                    .zip(&unit_vec)
                    .map(|(p, u)| p * u)
                    .sum::<f32>()
            });
            junction_speed_sqr(junction_cos, acceleration, self.limits.junction_deviation)
        };
        let profile_speed = profile_nominal_speed(
            nominal_speed,
            rapid_rate,
            request.condition,
            self.system.feed_override(),
            self.system.rapid_override(),
        );
        let max_entry_speed_sqr = max_junction_speed_sqr
            .min(profile_speed * profile_speed)
            .min(self.previous_nominal_speed * self.previous_nominal_speed);

        let block = MotionBlock {
            steps: magnitudes,
            direction,
            step_event_count,
            millimeters,
            acceleration,
            nominal_speed,
            rapid_rate,
            condition: request.condition,
            max_junction_speed_sqr,
            max_entry_speed_sqr: AtomicF32::new(max_entry_speed_sqr),
            ..MotionBlock::default()
        };
        if self.producer.enqueue(block).is_err() {
            return Submit::Full;
        }

        for axis in 0..N_AXIS {
            self.position[axis] += request.steps[axis];
        }
        self.previous_unit_vec = unit_vec;
        self.previous_nominal_speed = profile_speed;

        debug!(
            steps = ?request.steps,
            millimeters,
            nominal_speed,
            profile_speed,
            max_entry = max_entry_speed_sqr.sqrt(),
            "Block queued"
        );
        self.recalculate();
        Submit::Queued
    }

    /// Replan entry and exit speeds over every block not yet executed.
    pub fn recalculate(&mut self) {
        let blocks = self.producer.queued();
        let Some(newest) = blocks.last() else {
            return;
        };

        // Reverse pass.
        newest.set_entry_speed_sqr(
            newest
                .max_entry_speed_sqr()
                .min(newest.reachable_speed_sqr(0.0)),
        );
        for pair in blocks.windows(2).rev() {
            let (current, next) = (pair[0], pair[1]);
            current.set_entry_speed_sqr(
                current
                    .max_entry_speed_sqr()
                    .min(current.reachable_speed_sqr(next.entry_speed_sqr())),
            );
        }

        // Forward pass, from the executing block if there is one.
        let executing = self.producer.executing();
        if let Some(partial) = self.partial
            && executing.is_none_or(|exec| exec.sequence != partial.0)
        {
            self.partial = None;
        }
        if let Some(exec) = executing {
            let reachable = match self.partial {
                Some((_, remaining_mm)) => 2.0 * exec.block.acceleration * remaining_mm,
                None => exec.block.reachable_speed_sqr(exec.block.entry_speed_sqr()),
            };
            let first = blocks[0];
            let entry = first.entry_speed_sqr().min(reachable);
            first.set_entry_speed_sqr(entry);
            exec.block.set_exit_speed_sqr(entry);
        }
        for pair in blocks.windows(2) {
            let (previous, current) = (pair[0], pair[1]);
            let entry = current
                .entry_speed_sqr()
                .min(previous.reachable_speed_sqr(previous.entry_speed_sqr()));
            current.set_entry_speed_sqr(entry);
            previous.set_exit_speed_sqr(entry);
        }
        newest.set_exit_speed_sqr(0.0);
    }

    /// Re-derive every queued block's entry cap from the current feed and
    /// rapid overrides, then replan. Call after a motion override changes.
    pub fn update_velocity_profile(&mut self) {
        let (feed, rapid) = (self.system.feed_override(), self.system.rapid_override());
        let mut previous = self
            .producer
            .executing()
            .map_or(SOME_LARGE_VALUE, |exec| exec.block.profile_nominal_speed(feed, rapid));
        for block in self.producer.queued() {
            let profile_speed = block.profile_nominal_speed(feed, rapid);
            block.set_max_entry_speed_sqr(
                block
                    .max_junction_speed_sqr
                    .min(profile_speed * profile_speed)
                    .min(previous * previous),
            );
            previous = profile_speed;
        }
        // Blocks queued later join at the newest block's cruise speed.
        if previous != SOME_LARGE_VALUE {
            self.previous_nominal_speed = previous;
        }
        debug!(feed, rapid, "Velocity profile updated");
        self.recalculate();
    }

    /// Resume planning after a hold left the executing block stopped with
    /// `remaining_mm` still to go.
    pub fn cycle_reinitialize(&mut self, remaining_mm: f32) {
        self.partial = self
            .producer
            .executing()
            .map(|exec| (exec.sequence, remaining_mm));
        self.recalculate();
    }

    /// Forget all look-ahead state. The ring itself is emptied by the
    /// pulse engine.
    pub fn reset(&mut self) {
        self.partial = None;
        self.previous_unit_vec = [0.0; N_AXIS];
        self.previous_nominal_speed = 0.0;
        self.sync_position();
    }

    /// Take the planned position from the machine position.
    pub fn sync_position(&mut self) {
        self.position = self.system.position();
    }

    /// Reload axis limits. Only while idle.
    pub fn update_settings(&mut self, settings: &Settings) {
        self.limits = AxisLimits::from_settings(settings);
    }

    /// Blocks waiting to execute, oldest first.
    pub fn queued_blocks(&self) -> heapless::Vec<&MotionBlock, N> {
        self.producer.queued()
    }

    /// Free ring slots.
    pub fn available(&self) -> usize {
        self.producer.available()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// Planned position [steps].
    pub fn position(&self) -> [i32; N_AXIS] {
        self.position
    }

    /// Planned position [mm].
    pub fn position_mm(&self) -> [f32; N_AXIS] {
        std::array::from_fn(|axis| self.position[axis] as f32 / self.limits.steps_per_mm[axis])
    }
}
