//! Shared rig for the integration tests.

mod check_mode_settings;
mod feed_hold;
mod limits;
mod motion_profile;
mod overrides;
mod reset_abort;
mod safety_door;

use cnc_common::consts::N_AXIS;
use cnc_motion::buffer::BlockCondition;
use cnc_motion::config::ControllerConfig;
use cnc_motion::controller::Controller;
use cnc_motion::planner::PlanLine;
use cnc_motion::report::Report;
use cnc_motion::sim::SimHal;

/// Polls per simulated second at the default 30 kHz / 30 ticks per poll.
pub const POLLS_PER_SECOND: usize = 1000;

/// Default machine: 250 steps/mm, 500 mm/min, 10 mm/s², 200 mm travel.
pub fn controller() -> Controller<SimHal> {
    controller_with(|_| {})
}

pub fn controller_with(adjust: impl FnOnce(&mut ControllerConfig)) -> Controller<SimHal> {
    let mut config = ControllerConfig::default();
    adjust(&mut config);
    Controller::new(config, SimHal::new()).unwrap()
}

pub fn feed(rate: f32) -> PlanLine {
    PlanLine {
        feed_rate: rate,
        condition: BlockCondition::empty(),
    }
}

pub fn rapid() -> PlanLine {
    PlanLine {
        feed_rate: 0.0,
        condition: BlockCondition::RAPID,
    }
}

pub fn line(ctl: &mut Controller<SimHal>, target: [f32; N_AXIS], feed_rate: f32) {
    ctl.buffer_line(&target, feed(feed_rate)).unwrap();
}

/// Poll for `seconds` of simulated time.
pub fn run_for(ctl: &mut Controller<SimHal>, seconds: f32) {
    let polls = (seconds * POLLS_PER_SECOND as f32) as usize;
    for _ in 0..polls {
        ctl.poll();
    }
}

/// Poll for `seconds`, returning the highest realtime feed seen [mm/min].
pub fn peak_feed_over(ctl: &mut Controller<SimHal>, seconds: f32) -> f32 {
    let polls = (seconds * POLLS_PER_SECOND as f32) as usize;
    let mut peak = 0.0f32;
    for _ in 0..polls {
        ctl.poll();
        peak = peak.max(ctl.system().realtime_rate());
    }
    peak
}

pub fn reports(ctl: &mut Controller<SimHal>) -> Vec<Report> {
    ctl.drain_reports().collect()
}

/// Send a realtime byte `times` times, one main-loop pass apart.
///
/// Repeats of one request within a single pass collapse into one.
pub fn press(ctl: &mut Controller<SimHal>, byte: u8, times: usize) {
    let rt = ctl.realtime();
    for _ in 0..times {
        rt.dispatch_byte(byte);
        ctl.poll();
    }
}
