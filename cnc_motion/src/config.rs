//! TOML configuration for the motion controller.
//!
//! One file holds everything: `[shared]`, `[settings]` (with
//! `[settings.spindle]` and `[[settings.axes]]`), `[timing]` and
//! `[overrides]`. Every field has a default, so an empty file is a valid
//! configuration for the default machine.

use std::path::Path;

use cnc_common::config::{ConfigError, ConfigLoader, SharedConfig};
use cnc_common::consts::{
    DEFAULT_ACCELERATION_TICKS_PER_SECOND, DEFAULT_PULSE_FREQUENCY_HZ, DEFAULT_TICKS_PER_POLL,
};
use cnc_common::settings::Settings;
use serde::{Deserialize, Serialize};

use crate::state::overrides::OverrideLimits;

// ─── Bounds ─────────────────────────────────────────────────────────

pub const MIN_PULSE_FREQUENCY_HZ: u32 = 1_000;
pub const MAX_PULSE_FREQUENCY_HZ: u32 = 200_000;
pub const MIN_ACCELERATION_TICKS_PER_SECOND: u32 = 10;
pub const MAX_ACCELERATION_TICKS_PER_SECOND: u32 = 1_000;
pub const MIN_TICKS_PER_POLL: u32 = 1;
pub const MAX_TICKS_PER_POLL: u32 = 100_000;

// ─── Timing ─────────────────────────────────────────────────────────

/// Pulse tick timing on the simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseTiming {
    /// Pulse tick frequency [Hz]. At most one step event per tick.
    pub pulse_frequency_hz: u32,
    /// Speed updates per second; must divide `pulse_frequency_hz`.
    pub acceleration_ticks_per_second: u32,
    /// Pulse ticks run per main-loop poll.
    pub ticks_per_poll: u32,
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self {
            pulse_frequency_hz: DEFAULT_PULSE_FREQUENCY_HZ,
            acceleration_ticks_per_second: DEFAULT_ACCELERATION_TICKS_PER_SECOND,
            ticks_per_poll: DEFAULT_TICKS_PER_POLL,
        }
    }
}

impl PulseTiming {
    /// Pulse ticks between speed updates.
    #[inline]
    pub const fn ticks_per_acceleration_tick(&self) -> u32 {
        self.pulse_frequency_hz / self.acceleration_ticks_per_second
    }

    /// Tick period [µs].
    #[inline]
    pub fn tick_period_us(&self) -> f32 {
        1_000_000.0 / self.pulse_frequency_hz as f32
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_PULSE_FREQUENCY_HZ..=MAX_PULSE_FREQUENCY_HZ).contains(&self.pulse_frequency_hz) {
            return Err(format!(
                "pulse_frequency_hz {} out of range [{MIN_PULSE_FREQUENCY_HZ}, {MAX_PULSE_FREQUENCY_HZ}]",
                self.pulse_frequency_hz
            ));
        }
        if !(MIN_ACCELERATION_TICKS_PER_SECOND..=MAX_ACCELERATION_TICKS_PER_SECOND)
            .contains(&self.acceleration_ticks_per_second)
        {
            return Err(format!(
                "acceleration_ticks_per_second {} out of range [{MIN_ACCELERATION_TICKS_PER_SECOND}, {MAX_ACCELERATION_TICKS_PER_SECOND}]",
                self.acceleration_ticks_per_second
            ));
        }
        if self.pulse_frequency_hz % self.acceleration_ticks_per_second != 0 {
            return Err(format!(
                "acceleration_ticks_per_second {} must divide pulse_frequency_hz {}",
                self.acceleration_ticks_per_second, self.pulse_frequency_hz
            ));
        }
        if !(MIN_TICKS_PER_POLL..=MAX_TICKS_PER_POLL).contains(&self.ticks_per_poll) {
            return Err(format!(
                "ticks_per_poll {} out of range [{MIN_TICKS_PER_POLL}, {MAX_TICKS_PER_POLL}]",
                self.ticks_per_poll
            ));
        }
        Ok(())
    }
}

// ─── Controller Config ──────────────────────────────────────────────

/// Complete controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub shared: SharedConfig,
    pub settings: Settings,
    pub timing: PulseTiming,
    pub overrides: OverrideLimits,
}

impl ControllerConfig {
    /// Check every section and the constraints between them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.settings
            .validate()
            .map_err(ConfigError::ValidationError)?;
        self.timing.validate().map_err(ConfigError::ValidationError)?;
        self.overrides
            .validate()
            .map_err(ConfigError::ValidationError)?;
        validate_against_timing(&self.settings, &self.timing).map_err(ConfigError::ValidationError)
    }
}

/// Settings that only make sense for a given tick rate.
///
/// Also used when a `$n` write changes the settings at runtime.
pub fn validate_against_timing(settings: &Settings, timing: &PulseTiming) -> Result<(), String> {
    let pulse_us = f32::from(settings.pulse_microseconds);
    if pulse_us >= timing.tick_period_us() {
        return Err(format!(
            "step pulse {pulse_us} µs does not fit in the {:.1} µs tick period",
            timing.tick_period_us()
        ));
    }
    let max_steps_per_min = timing.pulse_frequency_hz as f32 * 60.0;
    for (idx, axis) in settings.axes.iter().enumerate() {
        if axis.steps_per_mm * axis.max_rate > max_steps_per_min {
            return Err(format!(
                "axis {idx}: {} steps/mm at {} mm/min needs more than one step per tick",
                axis.steps_per_mm, axis.max_rate
            ));
        }
    }
    Ok(())
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the controller configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let config = ControllerConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML string (for testing).
pub fn load_config_from_str(text: &str) -> Result<ControllerConfig, ConfigError> {
    let config = ControllerConfig::from_toml_str(text)?;
    config.validate()?;
    Ok(config)
}
