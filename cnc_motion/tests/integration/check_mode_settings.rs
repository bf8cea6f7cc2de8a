//! Integration test: check mode and `$n=value` settings.

use cnc_common::error::StatusCode;
use cnc_common::state::{MachineState, SpindleState};
use cnc_motion::error::ControlError;
use cnc_motion::report::{MSG_DISABLED, MSG_ENABLED, Report};

use super::{controller, line, peak_feed_over, rapid, reports, run_for};

fn refused(code: StatusCode) -> Result<(), ControlError> {
    Err(ControlError::Status(code))
}

#[test]
fn check_mode_accepts_program_without_motion() {
    let mut ctl = controller();
    ctl.toggle_check_mode().unwrap();
    assert_eq!(ctl.state(), MachineState::CheckMode);
    assert!(reports(&mut ctl).contains(&Report::feedback(MSG_ENABLED)));

    // Far more moves than the ring holds; none of them block.
    for i in 0..100 {
        let x = -((i % 10) as f32) - 1.0;
        line(&mut ctl, [x, -1.0, 0.0], 300.0);
    }
    ctl.spindle_sync(SpindleState::Cw, 500.0).unwrap();
    ctl.dwell(5.0).unwrap();
    ctl.buffer_synchronize().unwrap();

    assert_eq!(ctl.hal().total_pulses(), 0);
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);
    assert_eq!(ctl.elapsed_ticks(), 0);

    ctl.toggle_check_mode().unwrap();
    assert_eq!(ctl.state(), MachineState::Idle);
    assert!(reports(&mut ctl).contains(&Report::feedback(MSG_DISABLED)));
    assert!(!ctl.is_busy());
}

#[test]
fn check_mode_toggles_only_from_idle() {
    let mut ctl = controller();
    line(&mut ctl, [-5.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 0.1);
    assert_eq!(ctl.toggle_check_mode(), refused(StatusCode::IdleError));
}

#[test]
fn settings_change_only_while_idle() {
    let mut ctl = controller();
    line(&mut ctl, [-5.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 0.1);
    assert_eq!(ctl.store_setting(110, 300.0), refused(StatusCode::IdleError));
    assert_eq!(ctl.settings().axes[0].max_rate, 500.0);
}

#[test]
fn max_rate_setting_raises_rapid_speed() {
    let mut ctl = controller();
    ctl.store_setting(110, 1000.0).unwrap();
    assert_eq!(ctl.settings().axes[0].max_rate, 1000.0);

    ctl.buffer_line(&[-40.0, 0.0, 0.0], rapid()).unwrap();
    let peak = peak_feed_over(&mut ctl, 5.0);
    assert!(peak > 990.0 && peak <= 1005.0, "peak {peak}");
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-10_000, 0, 0]);
}

#[test]
fn invalid_settings_leave_everything_unchanged() {
    let mut ctl = controller();
    let before = ctl.settings().clone();

    assert_eq!(ctl.store_setting(0, 2.0), refused(StatusCode::StepPulseMin));
    // 40 µs does not fit in a 33 µs tick.
    assert_eq!(ctl.store_setting(0, 40.0), refused(StatusCode::InvalidStatement));
    assert_eq!(
        ctl.store_setting(100, 4000.0),
        refused(StatusCode::MaxStepRateExceeded)
    );
    assert_eq!(ctl.store_setting(20, 1.0), refused(StatusCode::SoftLimitError));
    assert_eq!(ctl.store_setting(44, 1.0), refused(StatusCode::InvalidStatement));
    assert_eq!(
        ctl.store_setting(32, 1.0),
        refused(StatusCode::SettingDisabledLaser)
    );
    assert_eq!(ctl.store_setting(120, -1.0), refused(StatusCode::NegativeValue));

    assert_eq!(ctl.settings(), &before);
}

#[test]
fn zero_axis_rates_are_refused() {
    let mut ctl = controller();
    line(&mut ctl, [-2.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();
    let before = ctl.settings().clone();

    for parameter in [100, 110, 120] {
        assert_eq!(
            ctl.store_setting(parameter, 0.0),
            refused(StatusCode::InvalidStatement),
            "parameter {parameter}"
        );
    }
    // Minimum PWM on-time above the maximum fails the whole-table check.
    assert_eq!(
        ctl.store_setting(42, 5000.0),
        refused(StatusCode::InvalidStatement)
    );

    assert_eq!(ctl.settings(), &before);
    let position = ctl.machine_position();
    assert!(position.iter().all(|p| p.is_finite()));
    assert_eq!(position[0], -2.0);
}

#[test]
fn idle_lock_disables_drivers_unless_always_on() {
    let mut ctl = controller();
    line(&mut ctl, [-1.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();
    assert!(ctl.hal().enable_level());
    run_for(&mut ctl, 0.1);
    assert!(!ctl.hal().enable_level());

    ctl.store_setting(1, 255.0).unwrap();
    assert!(ctl.hal().enable_level());
    line(&mut ctl, [-2.0, 0.0, 0.0], 300.0);
    ctl.buffer_synchronize().unwrap();
    run_for(&mut ctl, 0.1);
    assert!(ctl.hal().enable_level());
}
