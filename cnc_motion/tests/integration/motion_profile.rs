//! Integration test: planned motion lands on exact steps with the
//! expected speed profile.

use cnc_common::error::StatusCode;
use cnc_common::state::MachineState;
use cnc_motion::controller::Controller;
use cnc_motion::error::ControlError;
use cnc_motion::sim::SimHal;

use super::{controller, controller_with, feed, line, peak_feed_over, rapid, run_for};

#[test]
fn multi_segment_path_lands_on_exact_steps() {
    let mut ctl = controller();
    line(&mut ctl, [-2.0, 0.0, 0.0], 400.0);
    line(&mut ctl, [-2.0, -3.0, 0.0], 400.0);
    line(&mut ctl, [-5.0, -5.0, -1.0], 250.0);
    ctl.buffer_synchronize().unwrap();

    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().position(), [-1250, -1250, -250]);
    assert_eq!(ctl.system().position(), [-1250, -1250, -250]);
    assert_eq!(ctl.machine_position(), [-5.0, -5.0, -1.0]);
}

#[test]
fn single_move_follows_trapezoid_timing() {
    let mut ctl = controller();
    let start = ctl.elapsed_seconds();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();
    let elapsed = ctl.elapsed_seconds() - start;

    // 10 mm at 5 mm/s with 10 mm/s² ramps: 2 s cruise-equivalent + 0.5 s.
    assert!(elapsed > 2.3 && elapsed < 3.0, "took {elapsed} s");
}

#[test]
fn cruise_reaches_programmed_feed() {
    let mut ctl = controller();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    let peak = peak_feed_over(&mut ctl, 1.5);
    assert!(peak > 295.0 && peak <= 303.0, "peak {peak}");
}

#[test]
fn collinear_blocks_keep_speed_through_junctions() {
    let mut ctl = controller();
    for i in 1..=10 {
        line(&mut ctl, [-(i as f32), 0.0, 0.0], 300.0);
    }
    run_for(&mut ctl, 0.8);

    let mut slowest = f32::MAX;
    for _ in 0..800 {
        ctl.poll();
        slowest = slowest.min(ctl.system().realtime_rate());
    }
    assert!(slowest > 280.0, "dropped to {slowest} mm/min between blocks");

    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-2500, 0, 0]);
}

#[test]
fn sharp_corner_slows_at_the_junction() {
    let mut ctl = controller();
    line(&mut ctl, [-5.0, 0.0, 0.0], 400.0);
    line(&mut ctl, [-5.0, -5.0, 0.0], 400.0);

    let reached = ctl.poll_until(10_000, |c| c.hal().position()[1] != 0);
    assert!(reached);
    let corner = ctl.system().realtime_rate();
    assert!(corner > 0.0 && corner < 100.0, "corner speed {corner}");

    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-1250, -1250, 0]);
}

#[test]
fn short_move_never_reaches_nominal() {
    let mut ctl = controller();
    line(&mut ctl, [-0.5, 0.0, 0.0], 500.0);
    let peak = peak_feed_over(&mut ctl, 1.0);
    // Triangle profile: sqrt(a * d) = sqrt(36000 * 0.5) ≈ 134 mm/min.
    assert!(peak < 145.0, "peak {peak}");
    assert!(!ctl.is_busy());
}

#[test]
fn rapid_runs_at_axis_rate_limit() {
    let mut ctl = controller();
    ctl.buffer_line(&[-20.0, 0.0, 0.0], rapid()).unwrap();
    let peak = peak_feed_over(&mut ctl, 3.0);
    assert!(peak > 490.0 && peak <= 505.0, "peak {peak}");
}

#[test]
fn diagonal_feed_is_limited_by_the_slowest_axis() {
    let mut ctl = controller_with_slow_z();
    ctl.buffer_line(&[-10.0, 0.0, -10.0], rapid()).unwrap();
    let peak = peak_feed_over(&mut ctl, 4.0);
    // Z at 100 mm/min limits the 45° move to 100·√2.
    assert!(peak < 145.0, "peak {peak}");
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-2500, 0, -2500]);
}

fn controller_with_slow_z() -> Controller<SimHal> {
    controller_with(|config| config.settings.axes[2].max_rate = 100.0)
}

#[test]
fn unreachable_targets_are_refused() {
    let mut ctl = controller();
    for target in [f32::NAN, f32::INFINITY, -1.0e10] {
        assert_eq!(
            ctl.buffer_line(&[target, 0.0, 0.0], feed(300.0)),
            Err(ControlError::Status(StatusCode::InvalidStatement)),
            "target {target}"
        );
    }
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(!ctl.is_busy());

    line(&mut ctl, [-1.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-250, 0, 0]);
}
