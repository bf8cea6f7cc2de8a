//! Integration test: hard limits, soft limits and the homing hooks.

use cnc_common::axis::AxisMask;
use cnc_common::error::{Alarm, StatusCode};
use cnc_common::state::{MachineState, SpindleState};
use cnc_motion::config::ControllerConfig;
use cnc_motion::controller::Controller;
use cnc_motion::error::ControlError;
use cnc_motion::report::{MSG_RESET_TO_CONTINUE, MSG_UNLOCK, Report};
use cnc_motion::sim::SimHal;

use super::{controller, controller_with, feed, line, reports, run_for};

fn soft_limited() -> Controller<SimHal> {
    let mut ctl = controller_with(|config| {
        config.settings.homing_enable = true;
        config.settings.soft_limits = true;
    });
    ctl.unlock().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    ctl
}

#[test]
fn hard_limit_halts_and_latches_until_reset() {
    let mut ctl = controller_with(|config| config.settings.hard_limits = true);
    ctl.spindle_sync(SpindleState::Cw, 500.0).unwrap();
    line(&mut ctl, [-20.0, 0.0, 0.0], 400.0);
    run_for(&mut ctl, 1.0);
    reports(&mut ctl);

    ctl.hal_mut().set_limit_pins(AxisMask::X);
    ctl.poll();
    let stopped = ctl.hal().position();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert_eq!(ctl.latched_alarm(), Some(Alarm::HardLimit));
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);
    let seen = reports(&mut ctl);
    assert!(seen.contains(&Report::alarm(Alarm::HardLimit)));
    assert!(seen.contains(&Report::feedback(MSG_RESET_TO_CONTINUE)));

    // No pulses after the trip, and nothing gets through the latch.
    run_for(&mut ctl, 0.5);
    assert_eq!(ctl.hal().position(), stopped);
    assert_eq!(
        ctl.unlock(),
        Err(ControlError::Locked(Alarm::HardLimit))
    );
    assert_eq!(
        ctl.buffer_line(&[-1.0, 0.0, 0.0], feed(100.0)),
        Err(ControlError::Locked(Alarm::HardLimit))
    );

    // Reset clears the latch but the machine stays locked.
    ctl.realtime().dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert_eq!(ctl.latched_alarm(), None);
    assert!(reports(&mut ctl).contains(&Report::feedback(MSG_UNLOCK)));

    ctl.unlock().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().position(), stopped);
}

#[test]
fn limit_pins_ignored_with_hard_limits_off() {
    let mut ctl = controller();
    line(&mut ctl, [-4.0, 0.0, 0.0], 400.0);
    run_for(&mut ctl, 0.3);
    ctl.hal_mut().set_limit_pins(AxisMask::X | AxisMask::Y);
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.hal().position(), [-1000, 0, 0]);
}

#[test]
fn inverted_limit_pins_trip_on_falling_input() {
    let mut config = ControllerConfig::default();
    config.settings.hard_limits = true;
    config.settings.invert_limit_pins = true;
    let mut hal = SimHal::new();
    hal.set_limit_pins(AxisMask::all());
    let mut ctl = Controller::new(config, hal).unwrap();

    run_for(&mut ctl, 0.1);
    assert_eq!(ctl.state(), MachineState::Idle);

    ctl.hal_mut().set_limit_pins(AxisMask::all() - AxisMask::Z);
    ctl.poll();
    assert_eq!(ctl.latched_alarm(), Some(Alarm::HardLimit));
}

#[test]
fn soft_limit_refuses_move_and_latches() {
    let mut ctl = soft_limited();
    line(&mut ctl, [-10.0, -10.0, 0.0], 500.0);

    assert_eq!(
        ctl.buffer_line(&[-250.0, 0.0, 0.0], feed(500.0)),
        Err(ControlError::Locked(Alarm::SoftLimit))
    );
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert_eq!(ctl.latched_alarm(), Some(Alarm::SoftLimit));
    assert!(reports(&mut ctl).contains(&Report::alarm(Alarm::SoftLimit)));

    // The queued move is dropped with the abort.
    let before = ctl.hal().position();
    run_for(&mut ctl, 0.5);
    assert_eq!(ctl.hal().position(), before);
}

#[test]
fn soft_limit_rejects_positive_coordinates() {
    let mut ctl = soft_limited();
    assert_eq!(
        ctl.buffer_line(&[0.0, 0.5, 0.0], feed(500.0)),
        Err(ControlError::Locked(Alarm::SoftLimit))
    );
}

#[test]
fn jog_beyond_travel_is_refused_without_alarm() {
    let mut ctl = soft_limited();
    assert_eq!(
        ctl.jog_line(&[-250.0, 0.0, 0.0], 300.0),
        Err(ControlError::Status(StatusCode::TravelExceeded))
    );
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.latched_alarm(), None);

    ctl.jog_line(&[-2.0, 0.0, 0.0], 300.0).unwrap();
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-500, 0, 0]);
}

#[test]
fn homing_latches_limits_instead_of_alarming() {
    let mut ctl = controller_with(|config| {
        config.settings.homing_enable = true;
        config.settings.hard_limits = true;
    });
    assert_eq!(ctl.state(), MachineState::Alarm);
    ctl.begin_homing().unwrap();
    assert_eq!(ctl.state(), MachineState::Homing);
    assert_eq!(
        ctl.buffer_line(&[-1.0, 0.0, 0.0], feed(100.0)),
        Err(ControlError::Status(StatusCode::IdleError))
    );

    ctl.hal_mut().set_limit_pins(AxisMask::X);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Homing);
    assert_eq!(ctl.latched_alarm(), None);
    assert_eq!(ctl.homing_limits(), AxisMask::X);
    assert!(ctl.homing_limits().is_empty());

    ctl.finish_homing(&[-1.0, -2.0, 0.0]).unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert_eq!(ctl.machine_position(), [-1.0, -2.0, 0.0]);
}

#[test]
fn homing_requires_it_enabled() {
    let mut ctl = controller();
    assert_eq!(
        ctl.begin_homing(),
        Err(ControlError::Status(StatusCode::SettingDisabled))
    );
    assert_eq!(
        ctl.finish_homing(&[0.0; 3]),
        Err(ControlError::Status(StatusCode::IdleError))
    );
}

#[test]
fn reset_during_homing_fails_homing() {
    let mut ctl = controller_with(|config| config.settings.homing_enable = true);
    ctl.begin_homing().unwrap();
    reports(&mut ctl);

    ctl.realtime().dispatch_byte(0x18);
    ctl.poll();
    assert_eq!(ctl.state(), MachineState::Alarm);
    assert!(reports(&mut ctl).contains(&Report::alarm(Alarm::HomingFailReset)));
}
