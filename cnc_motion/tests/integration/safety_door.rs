//! Integration test: safety door suspend and restore.

use cnc_common::error::{Alarm, StatusCode};
use cnc_common::pins::ControlPins;
use cnc_common::state::{CoolantState, MachineState, SpindleState};
use cnc_motion::error::ControlError;
use cnc_motion::report::{MSG_CHECK_DOOR, Report};
use cnc_motion::system::Suspend;

use super::{controller, controller_with, line, reports, run_for};

#[test]
fn door_during_motion_stops_and_restores() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.spindle_sync(SpindleState::Cw, 900.0).unwrap();
    ctl.coolant_sync(CoolantState::FLOOD | CoolantState::MIST).unwrap();
    line(&mut ctl, [-10.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 1.0);

    ctl.hal_mut().set_control_pins(ControlPins::SAFETY_DOOR);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Door);
    // Outputs stay on until motion has stopped.
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Cw);

    run_for(&mut ctl, 1.0);
    assert!(ctl.system().suspend.contains(Suspend::HOLD_COMPLETE));
    assert!(ctl.system().suspend.contains(Suspend::SAFETY_DOOR_AJAR));
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);
    assert!(ctl.hal().coolant().is_empty());
    let stopped = ctl.hal().position();
    assert!(stopped[0] > -2500);

    // Resume refused while the door is still open.
    reports(&mut ctl);
    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Door);
    assert!(reports(&mut ctl).contains(&Report::feedback(MSG_CHECK_DOOR)));
    assert_eq!(ctl.hal().position(), stopped);

    ctl.hal_mut().set_control_pins(ControlPins::empty());
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Door);

    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Run);
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Cw);
    assert_eq!(ctl.hal().spindle_rpm(), 900.0);
    assert_eq!(ctl.hal().coolant(), CoolantState::FLOOD | CoolantState::MIST);

    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().position(), [-2500, 0, 0]);
}

#[test]
fn door_from_idle_de_energizes_at_once() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.spindle_sync(SpindleState::Ccw, 400.0).unwrap();

    rt.dispatch_byte(0x84);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Door);
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);

    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Ccw);
}

#[test]
fn door_during_jog_cancels_and_stays_in_door() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.jog_line(&[-10.0, 0.0, 0.0], 300.0).unwrap();
    run_for(&mut ctl, 0.6);

    rt.dispatch_byte(0x84);
    run_for(&mut ctl, 1.5);
    assert_eq!(ctl.state(), MachineState::Door);
    assert!(!ctl.is_busy());

    rt.dispatch_byte(b'~');
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(!ctl.is_busy());
}

#[test]
fn door_open_blocks_unlock_and_homing() {
    let mut ctl = controller_with(|config| config.settings.homing_enable = true);
    assert_eq!(ctl.state(), MachineState::Alarm);
    ctl.hal_mut().set_control_pins(ControlPins::SAFETY_DOOR);
    ctl.poll();

    assert_eq!(
        ctl.unlock(),
        Err(ControlError::Status(StatusCode::CheckDoor))
    );
    assert_eq!(
        ctl.begin_homing(),
        Err(ControlError::Status(StatusCode::CheckDoor))
    );
}

#[test]
fn door_during_homing_fails_homing() {
    let mut ctl = controller_with(|config| config.settings.homing_enable = true);
    ctl.begin_homing().unwrap();
    assert_eq!(ctl.state(), MachineState::Homing);

    ctl.hal_mut().set_control_pins(ControlPins::SAFETY_DOOR);
    ctl.poll();
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert!(reports(&mut ctl).contains(&Report::alarm(Alarm::HomingFailDoor)));
}
