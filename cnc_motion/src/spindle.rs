//! Spindle direction and speed.
//!
//! Speed goes out as a PWM time-on count computed by a [`PwmMapping`].
//! The programmed speed is scaled by the spindle override before mapping,
//! so an override change only needs [`Spindle::apply_override`].

use cnc_common::settings::SpindleSettings;
use cnc_common::state::SpindleState;
use serde::Serialize;

use crate::hal::MotionHal;

/// PWM count written when the spindle is off.
pub const SPINDLE_PWM_OFF_VALUE: u32 = 0;

/// rpm → PWM time-on strategy.
pub trait PwmMapping {
    /// Returns the PWM count and the speed it actually produces [rpm].
    fn pwm_value(&self, rpm: f32) -> (u32, f32);
}

/// Linear model between the `$31`/`$42` and `$30`/`$41` calibration points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPwm {
    rpm_min: f32,
    rpm_max: f32,
    min_time_on: u32,
    max_time_on: u32,
    gradient: f32,
}

impl LinearPwm {
    pub fn new(settings: &SpindleSettings) -> Self {
        let range = settings.pwm_max_time_on.saturating_sub(settings.pwm_min_time_on) as f32;
        let span = settings.rpm_max - settings.rpm_min;
        Self {
            rpm_min: settings.rpm_min,
            rpm_max: settings.rpm_max,
            min_time_on: settings.pwm_min_time_on,
            max_time_on: settings.pwm_max_time_on,
            gradient: if span > 0.0 { range / span } else { 0.0 },
        }
    }
}

impl PwmMapping for LinearPwm {
    fn pwm_value(&self, rpm: f32) -> (u32, f32) {
        if self.rpm_min >= self.rpm_max || rpm >= self.rpm_max {
            // No usable range: full on.
            (self.max_time_on, self.rpm_max)
        } else if rpm <= 0.0 {
            (SPINDLE_PWM_OFF_VALUE, 0.0)
        } else if rpm <= self.rpm_min {
            (self.min_time_on, self.rpm_min)
        } else {
            let pwm = ((rpm - self.rpm_min) * self.gradient).floor() as u32 + self.min_time_on;
            (pwm, rpm)
        }
    }
}

/// Spindle output state as shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpindleStatus {
    pub state: SpindleState,
    /// Programmed speed before override [rpm].
    pub programmed_rpm: f32,
    /// Speed being produced [rpm].
    pub rpm: f32,
    pub pwm: u32,
}

/// Spindle driver on top of a [`MotionHal`].
#[derive(Debug, Clone)]
pub struct Spindle<M: PwmMapping = LinearPwm> {
    mapping: M,
    state: SpindleState,
    programmed_rpm: f32,
    rpm: f32,
    pwm: u32,
}

impl Spindle<LinearPwm> {
    pub fn from_settings(settings: &SpindleSettings) -> Self {
        Self::new(LinearPwm::new(settings))
    }

    /// Reload the calibration. Keeps the current direction and speed.
    pub fn update_settings(&mut self, settings: &SpindleSettings) {
        self.mapping = LinearPwm::new(settings);
    }
}

impl<M: PwmMapping> Spindle<M> {
    pub fn new(mapping: M) -> Self {
        Self {
            mapping,
            state: SpindleState::Disable,
            programmed_rpm: 0.0,
            rpm: 0.0,
            pwm: SPINDLE_PWM_OFF_VALUE,
        }
    }

    /// Set direction and programmed speed, scaled by `override_pct`.
    pub fn set_state<H: MotionHal>(
        &mut self,
        hal: &mut H,
        state: SpindleState,
        rpm: f32,
        override_pct: u8,
    ) {
        self.programmed_rpm = rpm.max(0.0);
        if !state.is_enabled() {
            self.stop(hal);
            return;
        }
        self.state = state;
        self.write_speed(hal, override_pct);
    }

    /// Recompute the output after a spindle override change.
    pub fn apply_override<H: MotionHal>(&mut self, hal: &mut H, override_pct: u8) {
        if self.state.is_enabled() {
            self.write_speed(hal, override_pct);
        }
    }

    /// De-energize without forgetting the programmed speed.
    pub fn stop<H: MotionHal>(&mut self, hal: &mut H) {
        self.state = SpindleState::Disable;
        self.rpm = 0.0;
        self.pwm = SPINDLE_PWM_OFF_VALUE;
        hal.set_spindle_speed(SPINDLE_PWM_OFF_VALUE);
        hal.set_spindle_state(SpindleState::Disable, 0.0);
    }

    pub fn state(&self) -> SpindleState {
        self.state
    }

    pub fn programmed_rpm(&self) -> f32 {
        self.programmed_rpm
    }

    pub fn status(&self) -> SpindleStatus {
        SpindleStatus {
            state: self.state,
            programmed_rpm: self.programmed_rpm,
            rpm: self.rpm,
            pwm: self.pwm,
        }
    }

    fn write_speed<H: MotionHal>(&mut self, hal: &mut H, override_pct: u8) {
        let scaled = self.programmed_rpm * f32::from(override_pct) / 100.0;
        let (pwm, rpm) = self.mapping.pwm_value(scaled);
        self.pwm = pwm;
        self.rpm = rpm;
        hal.set_spindle_state(self.state, rpm);
        hal.set_spindle_speed(pwm);
    }
}
