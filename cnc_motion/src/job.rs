//! Job files: a scripted program for the simulator.
//!
//! A job stands in for the g-code front end. Each step maps onto one
//! producer-side controller operation.
//!
//! ```toml
//! name = "square"
//!
//! [[steps]]
//! type = "rapid"
//! target = [-10.0, -10.0, 0.0]
//!
//! [[steps]]
//! type = "spindle"
//! state = "cw"
//! rpm = 12000.0
//!
//! [[steps]]
//! type = "line"
//! target = [-20.0, -10.0, 0.0]
//! feed = 600.0
//! ```

use cnc_common::consts::N_AXIS;
use cnc_common::state::{CoolantState, SpindleState};
use serde::Deserialize;

use crate::buffer::BlockCondition;
use crate::controller::Controller;
use crate::error::ControlError;
use crate::hal::MotionHal;
use crate::planner::PlanLine;

/// One program step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStep {
    /// Feed move [mm, mm/min].
    Line { target: [f32; N_AXIS], feed: f32 },
    /// Rapid move at the axis rate limits.
    Rapid { target: [f32; N_AXIS] },
    /// Jog move [mm, mm/min].
    Jog { target: [f32; N_AXIS], feed: f32 },
    Spindle {
        state: SpindleState,
        #[serde(default)]
        rpm: f32,
    },
    Coolant {
        #[serde(default)]
        flood: bool,
        #[serde(default)]
        mist: bool,
    },
    /// Pause [s] once motion has drained.
    Dwell { seconds: f32 },
    /// `$n=value`.
    Setting { parameter: u16, value: f32 },
    /// Wait for the queue to drain.
    Sync,
    /// `$C`.
    CheckMode,
    /// `$X`.
    Unlock,
}

impl JobStep {
    /// Run this step against `controller`.
    pub fn execute<H: MotionHal>(&self, controller: &mut Controller<H>) -> Result<(), ControlError> {
        match *self {
            Self::Line { target, feed } => controller.buffer_line(
                &target,
                PlanLine {
                    feed_rate: feed,
                    condition: BlockCondition::empty(),
                },
            ),
            Self::Rapid { target } => controller.buffer_line(
                &target,
                PlanLine {
                    feed_rate: 0.0,
                    condition: BlockCondition::RAPID,
                },
            ),
            Self::Jog { target, feed } => controller.jog_line(&target, feed),
            Self::Spindle { state, rpm } => controller.spindle_sync(state, rpm),
            Self::Coolant { flood, mist } => {
                controller.coolant_sync(CoolantState::from_outputs(flood, mist))
            }
            Self::Dwell { seconds } => controller.dwell(seconds),
            Self::Setting { parameter, value } => controller.store_setting(parameter, value),
            Self::Sync => controller.buffer_synchronize(),
            Self::CheckMode => controller.toggle_check_mode(),
            Self::Unlock => controller.unlock(),
        }
    }
}

/// A named list of steps.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Job {
    pub name: String,
    pub steps: Vec<JobStep>,
}
