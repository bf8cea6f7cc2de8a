//! Integration test: feed hold, resume and jog cancel.

use cnc_common::state::MachineState;
use cnc_motion::report::Report;
use cnc_motion::stepper::StepperPhase;
use cnc_motion::system::Suspend;

use super::{controller, line, reports, run_for};

#[test]
fn hold_decelerates_stops_and_resumes_to_exact_target() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    assert_eq!(ctl.state(), MachineState::Run);

    rt.dispatch_byte(b'!');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Hold);
    // The pulse engine picks the hold up on its next tick.
    ctl.poll();
    assert_eq!(ctl.debug_snapshot().phase, StepperPhase::Hold);

    run_for(&mut ctl, 1.0);
    assert!(ctl.system().suspend.contains(Suspend::HOLD_COMPLETE));
    assert_eq!(ctl.system().realtime_rate(), 0.0);
    let stopped = ctl.hal().position();
    assert!(stopped[0] > -2500, "hold ran to the end of the move");

    run_for(&mut ctl, 0.5);
    assert_eq!(ctl.hal().position(), stopped);

    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Run);
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().position(), [-2500, 0, 0]);
}

#[test]
fn hold_distance_matches_deceleration() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-20.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.5);
    let at_hold = ctl.hal().position()[0];

    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 1.5);
    let travelled = at_hold - ctl.hal().position()[0];
    // 5 mm/s at 10 mm/s²: 1.25 mm, 312 steps.
    assert!(travelled > 250 && travelled < 380, "travelled {travelled} steps");
}

#[test]
fn hold_spanning_several_blocks_resumes_all_of_them() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    for i in 1..=5 {
        line(&mut ctl, [-2.0 * i as f32, 0.0, 0.0], 400.0);
    }
    run_for(&mut ctl, 0.8);
    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 1.5);
    assert_eq!(ctl.state(), MachineState::Hold);
    assert!(ctl.is_busy());

    rt.dispatch_byte(b'~');
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-2500, 0, 0]);
}

#[test]
fn cycle_start_during_deceleration_is_ignored() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);

    rt.dispatch_byte(b'!');
    ctl.poll();
    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Hold);
    assert!(!ctl.system().suspend.contains(Suspend::HOLD_COMPLETE));
}

#[test]
fn feed_hold_in_idle_completes_at_once() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    rt.dispatch_byte(b'!');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Hold);
    assert!(ctl.system().suspend.contains(Suspend::HOLD_COMPLETE));

    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Idle);
}

#[test]
fn status_during_hold_reports_zero_feed() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 1.0);
    reports(&mut ctl);

    rt.dispatch_byte(b'?');
    ctl.poll();
    let status = reports(&mut ctl)
        .into_iter()
        .find_map(|r| match r {
            Report::Status(status) => Some(status),
            _ => None,
        })
        .unwrap();
    assert_eq!(status.state, MachineState::Hold);
    assert_eq!(status.feed_rate, 0.0);
    assert!(status.machine_position[0] < 0.0);
}

#[test]
fn jog_cancel_stops_and_flushes() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.jog_line(&[-10.0, 0.0, 0.0], 300.0).unwrap();
    ctl.jog_line(&[-10.0, -5.0, 0.0], 300.0).unwrap();
    assert_eq!(ctl.state(), MachineState::Jog);
    run_for(&mut ctl, 0.6);

    rt.dispatch_byte(0x85);
    run_for(&mut ctl, 1.5);
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(!ctl.is_busy());
    assert!(ctl.system().suspend.load().is_empty());
    let stopped = ctl.hal().position();
    assert!(stopped[0] > -2500 && stopped[1] == 0, "{stopped:?}");
    assert_eq!(ctl.system().position(), [stopped[0] as i32, 0, 0]);

    // The planner restarts from where the jog stopped.
    let from_mm = ctl.machine_position();
    ctl.jog_line(&[from_mm[0] - 1.0, 0.0, 0.0], 200.0).unwrap();
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position()[0], stopped[0] - 250);
}

#[test]
fn feed_hold_during_jog_also_cancels() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.jog_line(&[-10.0, 0.0, 0.0], 300.0).unwrap();
    run_for(&mut ctl, 0.6);
    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 1.5);
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(!ctl.is_busy());
}
