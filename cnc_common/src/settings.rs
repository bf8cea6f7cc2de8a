//! Machine settings and `$n=value` write semantics.
//!
//! Settings are loaded from the `[settings]` table of the machine TOML and
//! may be rewritten one parameter at a time with
//! [`Settings::store_global_setting`]. Persistence is left to the caller.
//!
//! Units follow the operator-facing convention: rates in mm/min,
//! acceleration in mm/s², travel as a positive length in mm. Accessors
//! convert to the units the planner works in.

use serde::{Deserialize, Serialize};

use crate::axis::AxisMask;
use crate::consts::{
    AXIS_N_SETTINGS, AXIS_SETTINGS_INCREMENT, AXIS_SETTINGS_START, MAX_STEP_RATE_HZ, N_AXIS,
};
use crate::error::StatusCode;

/// Smallest accepted step pulse width [µs].
pub const STEP_PULSE_MICROSECONDS_MIN: u8 = 3;

/// Per-axis kinematic limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSettings {
    /// Steps per millimetre (`$100`).
    pub steps_per_mm: f32,
    /// Maximum rate [mm/min] (`$110`).
    pub max_rate: f32,
    /// Acceleration [mm/s²] (`$120`).
    pub acceleration: f32,
    /// Maximum travel [mm] (`$130`).
    pub max_travel: f32,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            steps_per_mm: 250.0,
            max_rate: 500.0,
            acceleration: 10.0,
            max_travel: 200.0,
        }
    }
}

impl AxisSettings {
    /// Acceleration in planner units [mm/min²].
    #[inline]
    pub fn acceleration_mm_per_min2(&self) -> f32 {
        self.acceleration * 60.0 * 60.0
    }

    /// Machine-coordinate travel limit. Travel runs from `-max_travel` to zero.
    #[inline]
    pub fn travel_limit(&self) -> f32 {
        -self.max_travel
    }
}

/// Spindle speed calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleSettings {
    /// Maximum spindle speed [rpm] (`$30`).
    pub rpm_max: f32,
    /// Minimum spindle speed [rpm] (`$31`).
    pub rpm_min: f32,
    /// PWM period [timer counts] (`$40`).
    pub pwm_period: u32,
    /// PWM time-on at `rpm_max` [timer counts] (`$41`).
    pub pwm_max_time_on: u32,
    /// PWM time-on at `rpm_min` [timer counts] (`$42`).
    pub pwm_min_time_on: u32,
    /// Drive PWM from power-up (`$43`).
    pub pwm_enable_at_start: bool,
}

impl Default for SpindleSettings {
    fn default() -> Self {
        Self {
            rpm_max: 1000.0,
            rpm_min: 0.0,
            pwm_period: 1000,
            pwm_max_time_on: 1000,
            pwm_min_time_on: 1,
            pwm_enable_at_start: false,
        }
    }
}

/// Global machine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Step pulse width [µs] (`$0`).
    pub pulse_microseconds: u8,
    /// Delay before disabling drivers once idle [ms]; 255 keeps them on (`$1`).
    pub stepper_idle_lock_time: u8,
    /// Step port invert mask (`$2`).
    pub step_invert_mask: u8,
    /// Direction port invert mask (`$3`).
    pub dir_invert_mask: u8,
    /// Invert stepper enable output (`$4`).
    pub invert_stepper_enable: bool,
    /// Invert limit inputs (`$5`).
    pub invert_limit_pins: bool,
    /// Invert probe input (`$6`).
    pub invert_probe_pin: bool,
    /// Status report field mask (`$10`).
    pub status_report_mask: u8,
    /// Junction deviation [mm] (`$11`).
    pub junction_deviation: f32,
    /// Arc tolerance [mm] (`$12`).
    pub arc_tolerance: f32,
    /// Report positions in inches (`$13`).
    pub report_inches: bool,
    /// Soft limits (`$20`). Requires homing.
    pub soft_limits: bool,
    /// Hard limits (`$21`).
    pub hard_limits: bool,
    /// Homing cycle enabled (`$22`).
    pub homing_enable: bool,
    /// Homing direction invert mask (`$23`).
    pub homing_dir_mask: u8,
    /// Homing locate feed rate [mm/min] (`$24`).
    pub homing_feed_rate: f32,
    /// Homing search seek rate [mm/min] (`$25`).
    pub homing_seek_rate: f32,
    /// Homing switch debounce [ms] (`$26`).
    pub homing_debounce_delay: u16,
    /// Homing switch pull-off distance [mm] (`$27`).
    pub homing_pulloff: f32,
    /// Spindle calibration (`$30`..`$43`).
    pub spindle: SpindleSettings,
    /// Per-axis limits (`$100`..`$133`).
    pub axes: [AxisSettings; N_AXIS],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pulse_microseconds: 10,
            stepper_idle_lock_time: 25,
            step_invert_mask: 0,
            dir_invert_mask: 0,
            invert_stepper_enable: false,
            invert_limit_pins: false,
            invert_probe_pin: false,
            status_report_mask: 1,
            junction_deviation: 0.01,
            arc_tolerance: 0.002,
            report_inches: false,
            soft_limits: false,
            hard_limits: false,
            homing_enable: false,
            homing_dir_mask: 0,
            homing_feed_rate: 25.0,
            homing_seek_rate: 500.0,
            homing_debounce_delay: 250,
            homing_pulloff: 1.0,
            spindle: SpindleSettings::default(),
            axes: [AxisSettings::default(); N_AXIS],
        }
    }
}

fn exceeds_max_step_rate(steps_per_mm: f32, max_rate: f32) -> bool {
    steps_per_mm * max_rate > MAX_STEP_RATE_HZ * 60.0
}

impl Settings {
    /// Step port invert mask as axis bits.
    #[inline]
    pub const fn step_invert(&self) -> AxisMask {
        AxisMask::from_setting(self.step_invert_mask)
    }

    /// Direction port invert mask as axis bits.
    #[inline]
    pub const fn dir_invert(&self) -> AxisMask {
        AxisMask::from_setting(self.dir_invert_mask)
    }

    /// Steps per millimetre for every axis.
    pub fn steps_per_mm(&self) -> [f32; N_AXIS] {
        self.axes.map(|a| a.steps_per_mm)
    }

    /// Write one `$parameter=value` setting.
    ///
    /// On error nothing is modified.
    ///
    /// # Errors
    ///
    /// - `NegativeValue` for any value below zero
    /// - `InvalidStatement` for unknown parameters, or a zero steps/mm,
    ///   max rate or acceleration
    /// - `StepPulseMin` for `$0` below 3 µs
    /// - `MaxStepRateExceeded` when steps/mm × max rate passes the step rate ceiling
    /// - `SoftLimitError` when enabling soft limits without homing
    /// - `SettingDisabledLaser` for `$32=1`
    pub fn store_global_setting(&mut self, parameter: u16, value: f32) -> Result<(), StatusCode> {
        if value < 0.0 {
            return Err(StatusCode::NegativeValue);
        }
        if parameter >= AXIS_SETTINGS_START {
            return self.store_axis_setting(parameter - AXIS_SETTINGS_START, value);
        }

        let int_value = value.trunc() as u8;
        let enabled = int_value != 0;
        match parameter {
            0 => {
                if int_value < STEP_PULSE_MICROSECONDS_MIN {
                    return Err(StatusCode::StepPulseMin);
                }
                self.pulse_microseconds = int_value;
            }
            1 => self.stepper_idle_lock_time = int_value,
            2 => self.step_invert_mask = int_value,
            3 => self.dir_invert_mask = int_value,
            4 => self.invert_stepper_enable = enabled,
            5 => self.invert_limit_pins = enabled,
            6 => self.invert_probe_pin = enabled,
            10 => self.status_report_mask = int_value,
            11 => self.junction_deviation = value,
            12 => self.arc_tolerance = value,
            13 => self.report_inches = enabled,
            20 => {
                if enabled && !self.homing_enable {
                    return Err(StatusCode::SoftLimitError);
                }
                self.soft_limits = enabled;
            }
            21 => self.hard_limits = enabled,
            22 => {
                self.homing_enable = enabled;
                if !enabled {
                    self.soft_limits = false;
                }
            }
            23 => self.homing_dir_mask = int_value,
            24 => self.homing_feed_rate = value,
            25 => self.homing_seek_rate = value,
            26 => self.homing_debounce_delay = value.trunc() as u16,
            27 => self.homing_pulloff = value,
            30 => self.spindle.rpm_max = value,
            31 => self.spindle.rpm_min = value,
            32 => {
                if enabled {
                    return Err(StatusCode::SettingDisabledLaser);
                }
            }
            40 => self.spindle.pwm_period = value.trunc() as u32,
            41 => self.spindle.pwm_max_time_on = value.trunc() as u32,
            42 => self.spindle.pwm_min_time_on = value.trunc() as u32,
            43 => self.spindle.pwm_enable_at_start = enabled,
            _ => return Err(StatusCode::InvalidStatement),
        }
        Ok(())
    }

    fn store_axis_setting(&mut self, offset: u16, value: f32) -> Result<(), StatusCode> {
        let group = offset / AXIS_SETTINGS_INCREMENT;
        let axis = (offset % AXIS_SETTINGS_INCREMENT) as usize;
        if group >= AXIS_N_SETTINGS || axis >= N_AXIS {
            return Err(StatusCode::InvalidStatement);
        }

        // Steps/mm, max rate and acceleration divide planner math.
        if group < 3 && value == 0.0 {
            return Err(StatusCode::InvalidStatement);
        }

        let limits = &mut self.axes[axis];
        match group {
            0 => {
                if exceeds_max_step_rate(value, limits.max_rate) {
                    return Err(StatusCode::MaxStepRateExceeded);
                }
                limits.steps_per_mm = value;
            }
            1 => {
                if exceeds_max_step_rate(limits.steps_per_mm, value) {
                    return Err(StatusCode::MaxStepRateExceeded);
                }
                limits.max_rate = value;
            }
            2 => limits.acceleration = value,
            _ => limits.max_travel = value,
        }
        Ok(())
    }

    /// Validate a freshly loaded settings table.
    pub fn validate(&self) -> Result<(), String> {
        if self.pulse_microseconds < STEP_PULSE_MICROSECONDS_MIN {
            return Err(format!(
                "pulse_microseconds {} below minimum {}",
                self.pulse_microseconds, STEP_PULSE_MICROSECONDS_MIN
            ));
        }
        if self.junction_deviation < 0.0 || self.arc_tolerance < 0.0 {
            return Err("junction_deviation and arc_tolerance must be non-negative".to_string());
        }
        if self.soft_limits && !self.homing_enable {
            return Err("soft_limits requires homing_enable".to_string());
        }
        if self.spindle.rpm_min < 0.0 || self.spindle.rpm_max < 0.0 {
            return Err("spindle rpm limits must be non-negative".to_string());
        }
        if self.spindle.pwm_min_time_on > self.spindle.pwm_max_time_on {
            return Err(format!(
                "pwm_min_time_on {} exceeds pwm_max_time_on {}",
                self.spindle.pwm_min_time_on, self.spindle.pwm_max_time_on
            ));
        }
        for (idx, axis) in self.axes.iter().enumerate() {
            if axis.steps_per_mm <= 0.0 || axis.max_rate <= 0.0 || axis.acceleration <= 0.0 {
                return Err(format!(
                    "axis {idx}: steps_per_mm, max_rate and acceleration must be positive"
                ));
            }
            if axis.max_travel < 0.0 {
                return Err(format!("axis {idx}: max_travel must be non-negative"));
            }
            if exceeds_max_step_rate(axis.steps_per_mm, axis.max_rate) {
                return Err(format!(
                    "axis {idx}: {} steps/mm at {} mm/min exceeds {} Hz",
                    axis.steps_per_mm, axis.max_rate, MAX_STEP_RATE_HZ
                ));
            }
        }
        Ok(())
    }
}
