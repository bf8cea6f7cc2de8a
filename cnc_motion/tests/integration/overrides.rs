//! Integration test: realtime feed, rapid and spindle overrides.

use cnc_common::state::{CoolantState, MachineState, SpindleState};

use super::{POLLS_PER_SECOND, controller, line, peak_feed_over, press, rapid, run_for};

#[test]
fn feed_override_raises_cruise_speed_mid_move() {
    let mut ctl = controller();
    line(&mut ctl, [-30.0, 0.0, 0.0], 200.0);
    let before = peak_feed_over(&mut ctl, 1.0);
    assert!(before <= 203.0, "peak before override {before}");

    press(&mut ctl, 0x91, 5);
    let after = peak_feed_over(&mut ctl, 1.5);
    assert_eq!(ctl.overrides().feed, 150);
    assert_eq!(ctl.system().feed_override(), 150);
    assert!(after > 295.0 && after <= 303.0, "peak after override {after}");

    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-7500, 0, 0]);
}

#[test]
fn feed_override_holds_cruise_through_junctions() {
    let mut ctl = controller();
    press(&mut ctl, 0x91, 5);
    assert_eq!(ctl.overrides().feed, 150);
    for x in 1..=10 {
        line(&mut ctl, [-(x as f32), 0.0, 0.0], 300.0);
    }

    // Cruise at 450 mm/min spans roughly 2.8 mm to 7.2 mm of the run.
    let (mut slowest, mut fastest) = (f32::MAX, 0.0f32);
    for _ in 0..(3 * POLLS_PER_SECOND) {
        ctl.poll();
        let x = -ctl.hal().position()[0];
        if (1000..=1500).contains(&x) {
            let rate = ctl.system().realtime_rate();
            slowest = slowest.min(rate);
            fastest = fastest.max(rate);
        }
    }
    assert!(slowest > 440.0, "dipped to {slowest} between junctions");
    assert!(fastest <= 455.0, "peak {fastest}");
    ctl.buffer_synchronize().unwrap();
    assert_eq!(ctl.hal().position(), [-2500, 0, 0]);
}

#[test]
fn override_change_mid_run_replans_queued_junctions() {
    let mut ctl = controller();
    for x in 1..=10 {
        line(&mut ctl, [-(x as f32), 0.0, 0.0], 300.0);
    }
    run_for(&mut ctl, 0.2);
    press(&mut ctl, 0x91, 5);

    let mut slowest = f32::MAX;
    for _ in 0..(3 * POLLS_PER_SECOND) {
        ctl.poll();
        let x = -ctl.hal().position()[0];
        if (1000..=1500).contains(&x) {
            slowest = slowest.min(ctl.system().realtime_rate());
        }
    }
    assert!(slowest > 440.0, "dipped to {slowest} between junctions");
}

#[test]
fn feed_override_never_exceeds_axis_rate() {
    let mut ctl = controller();
    press(&mut ctl, 0x91, 10);
    assert_eq!(ctl.overrides().feed, 200);

    line(&mut ctl, [-30.0, 0.0, 0.0], 400.0);
    let peak = peak_feed_over(&mut ctl, 3.0);
    assert!(peak > 490.0 && peak <= 505.0, "peak {peak}");
}

#[test]
fn feed_override_lowers_speed() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    press(&mut ctl, 0x92, 5);
    assert_eq!(ctl.overrides().feed, 50);

    line(&mut ctl, [-10.0, 0.0, 0.0], 400.0);
    let peak = peak_feed_over(&mut ctl, 2.0);
    assert!(peak > 195.0 && peak <= 203.0, "peak {peak}");

    rt.dispatch_byte(0x90);
    ctl.poll();
    assert_eq!(ctl.overrides().feed, 100);
}

#[test]
fn rapid_override_scales_rapids_only() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    rt.dispatch_byte(0x97);
    ctl.poll();
    assert_eq!(ctl.overrides().rapid, 25);

    ctl.buffer_line(&[-10.0, 0.0, 0.0], rapid()).unwrap();
    let peak = peak_feed_over(&mut ctl, 2.0);
    assert!(peak > 120.0 && peak <= 128.0, "rapid peak {peak}");
    ctl.buffer_synchronize().unwrap();

    line(&mut ctl, [-20.0, 0.0, 0.0], 300.0);
    let peak = peak_feed_over(&mut ctl, 1.5);
    assert!(peak > 295.0, "feed peak {peak}");
}

#[test]
fn spindle_override_rescales_running_spindle() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    ctl.spindle_sync(SpindleState::Cw, 500.0).unwrap();
    assert_eq!(ctl.hal().spindle_rpm(), 500.0);
    let pwm = ctl.hal().spindle_pwm();

    press(&mut ctl, 0x9A, 2);
    assert_eq!(ctl.overrides().spindle, 120);
    assert_eq!(ctl.hal().spindle_rpm(), 600.0);
    assert!(ctl.hal().spindle_pwm() > pwm);
    assert_eq!(ctl.snapshot().spindle.programmed_rpm, 500.0);

    rt.dispatch_byte(0x99);
    ctl.poll();
    assert_eq!(ctl.hal().spindle_rpm(), 500.0);
}

#[test]
fn spindle_override_applies_to_next_spindle_command() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    rt.dispatch_byte(0x9B);
    ctl.poll();
    assert_eq!(ctl.overrides().spindle, 90);
    assert_eq!(ctl.hal().spindle_state(), SpindleState::Disable);

    ctl.spindle_sync(SpindleState::Ccw, 500.0).unwrap();
    assert_eq!(ctl.hal().spindle_rpm(), 450.0);
}

#[test]
fn coolant_toggles_while_running() {
    let mut ctl = controller();
    let rt = ctl.realtime();
    line(&mut ctl, [-5.0, 0.0, 0.0], 300.0);
    run_for(&mut ctl, 0.5);
    assert_eq!(ctl.state(), MachineState::Run);

    rt.dispatch_byte(0xA0);
    ctl.poll();
    assert_eq!(ctl.hal().coolant(), CoolantState::FLOOD);
    rt.dispatch_byte(0xA1);
    rt.dispatch_byte(0xA0);
    ctl.poll();
    assert_eq!(ctl.hal().coolant(), CoolantState::MIST);
}
