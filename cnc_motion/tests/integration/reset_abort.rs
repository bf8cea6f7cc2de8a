//! Integration test: soft reset during and outside of motion.

use cnc_common::error::{Alarm, StatusCode};
use cnc_common::state::{CoolantState, MachineState, SpindleState};
use cnc_motion::controller::PollObserver;
use cnc_motion::error::ControlError;
use cnc_motion::realtime::RealtimeHandle;
use cnc_motion::report::{MSG_CAUTION_UNLOCKED, MSG_UNLOCK, Report};
use cnc_motion::system::StepControl;

use super::{controller, feed, line, reports, run_for};

#[test]
fn reset_during_motion_aborts_and_locks() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.spindle_sync(SpindleState::Cw, 800.0).unwrap();
    ctl.coolant_sync(CoolantState::FLOOD).unwrap();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    line(&mut ctl, [-10.0, -10.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    reports(&mut ctl);

    rt.dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert!(!ctl.is_busy());
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);
    assert!(ctl.hal().coolant().is_empty());
    assert!(!ctl.system().step_control.contains(StepControl::ABORT));

    let reports = reports(&mut ctl);
    assert!(reports.contains(&Report::alarm(Alarm::AbortCycle)));
    assert!(reports.contains(&Report::feedback(MSG_UNLOCK)));

    // The position survives the abort.
    let stopped = ctl.hal().position();
    assert!(stopped[0] < 0 && stopped[0] > -2500);
    let system = ctl.system().position();
    assert_eq!(
        [i64::from(system[0]), i64::from(system[1]), i64::from(system[2])],
        stopped
    );
    run_for(&mut ctl, 0.2);
    assert_eq!(ctl.hal().position(), stopped);
}

#[test]
fn locked_after_abort_until_unlocked() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    rt.dispatch_byte(0x18);
    ctl.poll();

    assert_eq!(
        ctl.buffer_line(&[-1.0, 0.0, 0.0], feed(100.0)),
        Err(ControlError::Status(StatusCode::SystemLocked))
    );
    assert_eq!(
        ctl.jog_line(&[-1.0, 0.0, 0.0], 100.0),
        Err(ControlError::Status(StatusCode::SystemLocked))
    );

    ctl.unlock().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(reports(&mut ctl).contains(&Report::feedback(MSG_CAUTION_UNLOCKED)));

    // The planner picks up from the aborted position.
    let start = ctl.hal().position()[0];
    let from_mm = ctl.machine_position();
    line(&mut ctl, [from_mm[0] - 1.0, 0.0, 0.0], 200.0);
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position()[0], start - 250);
}

#[test]
fn reset_while_idle_stays_unlocked() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-1.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();

    rt.dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(
        !reports(&mut ctl)
            .iter()
            .any(|r| matches!(r, Report::Alarm { .. }))
    );
}

#[test]
fn reset_after_completed_hold_keeps_position_valid() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 1.0);
    assert_eq!(ctl.state(), MachineState::Hold);

    rt.dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(!ctl.is_busy());
}

#[test]
fn reset_during_deceleration_still_aborts() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);
    rt.dispatch_byte(b'!');
    run_for(&mut ctl, 0.1);

    rt.dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert!(reports(&mut ctl).contains(&Report::alarm(Alarm::AbortCycle)));
}

#[test]
fn overrides_return_to_defaults_on_reset() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    rt.dispatch_byte(0x91);
    rt.dispatch_byte(0x97);
    ctl.poll();
    assert_eq!(ctl.overrides().feed, 110);
    assert_eq!(ctl.overrides().rapid, 25);

    rt.dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.overrides().feed, 100);
    assert_eq!(ctl.overrides().rapid, 100);
    assert_eq!(ctl.system().feed_override(), 100);
}

/// Requests a reset once the simulated clock passes a deadline.
struct ResetAt {
    realtime: RealtimeHandle,
    tick: u64,
}

impl PollObserver for ResetAt {
    fn after_poll(&mut self, elapsed_ticks: u64, _: &mut dyn Iterator<Item = Report>) {
        if elapsed_ticks >= self.tick {
            self.tick = u64::MAX;
            self.realtime.system().request_reset();
        }
    }
}

#[test]
fn reset_releases_a_blocked_producer() {
    let mut ctl = controller();
    let realtime = ctl.realtime();
    let tick = ctl.elapsed_ticks() + 30_000;
    ctl.set_observer(Box::new(ResetAt { realtime, tick }));

    let mut result = Ok(());
    for i in 1..=40 {
        result = ctl.buffer_line(&[-(i as f32), 0.0, 0.0], feed(300.0));
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(ControlError::Aborted));
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert!(!ctl.is_busy());
}
