//! Feed, rapid and spindle override percentages.
//!
//! Requests arrive as bits in [`MotionOverride`] / [`AccessoryOverride`]
//! and are folded into the current values by the main loop. Values are
//! clamped to [`OverrideLimits`]; the pulse engine picks them up on its
//! next speed update.

use cnc_common::consts::{
    DEFAULT_FEED_OVERRIDE, DEFAULT_RAPID_OVERRIDE, DEFAULT_SPINDLE_SPEED_OVERRIDE,
    FEED_OVERRIDE_COARSE_INCREMENT, FEED_OVERRIDE_FINE_INCREMENT, MAX_FEED_RATE_OVERRIDE,
    MAX_SPINDLE_SPEED_OVERRIDE, MIN_FEED_RATE_OVERRIDE, MIN_SPINDLE_SPEED_OVERRIDE,
    RAPID_OVERRIDE_LOW, RAPID_OVERRIDE_MEDIUM, SPINDLE_OVERRIDE_COARSE_INCREMENT,
    SPINDLE_OVERRIDE_FINE_INCREMENT,
};
use serde::{Deserialize, Serialize};

use crate::system::{AccessoryOverride, MotionOverride};

/// Configurable override ranges and step sizes [%].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideLimits {
    pub feed_min: u8,
    pub feed_max: u8,
    pub feed_coarse: u8,
    pub feed_fine: u8,
    pub rapid_medium: u8,
    pub rapid_low: u8,
    pub spindle_min: u8,
    pub spindle_max: u8,
    pub spindle_coarse: u8,
    pub spindle_fine: u8,
}

impl Default for OverrideLimits {
    fn default() -> Self {
        Self {
            feed_min: MIN_FEED_RATE_OVERRIDE,
            feed_max: MAX_FEED_RATE_OVERRIDE,
            feed_coarse: FEED_OVERRIDE_COARSE_INCREMENT,
            feed_fine: FEED_OVERRIDE_FINE_INCREMENT,
            rapid_medium: RAPID_OVERRIDE_MEDIUM,
            rapid_low: RAPID_OVERRIDE_LOW,
            spindle_min: MIN_SPINDLE_SPEED_OVERRIDE,
            spindle_max: MAX_SPINDLE_SPEED_OVERRIDE,
            spindle_coarse: SPINDLE_OVERRIDE_COARSE_INCREMENT,
            spindle_fine: SPINDLE_OVERRIDE_FINE_INCREMENT,
        }
    }
}

impl OverrideLimits {
    pub fn validate(&self) -> Result<(), String> {
        let ranges = [
            ("feed", self.feed_min, self.feed_max, DEFAULT_FEED_OVERRIDE),
            (
                "spindle",
                self.spindle_min,
                self.spindle_max,
                DEFAULT_SPINDLE_SPEED_OVERRIDE,
            ),
        ];
        for (name, min, max, default) in ranges {
            if min == 0 || min > default || max < default {
                return Err(format!(
                    "{name} override range {min}..={max} must be non-zero and contain {default}"
                ));
            }
        }
        if self.rapid_low == 0
            || self.rapid_low > self.rapid_medium
            || self.rapid_medium > DEFAULT_RAPID_OVERRIDE
        {
            return Err(format!(
                "rapid overrides must satisfy 0 < {} <= {} <= {}",
                self.rapid_low, self.rapid_medium, DEFAULT_RAPID_OVERRIDE
            ));
        }
        Ok(())
    }
}

/// Current override values [%].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Overrides {
    pub feed: u8,
    pub rapid: u8,
    pub spindle: u8,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: DEFAULT_FEED_OVERRIDE,
            rapid: DEFAULT_RAPID_OVERRIDE,
            spindle: DEFAULT_SPINDLE_SPEED_OVERRIDE,
        }
    }
}

fn step_percent(current: u8, up: u8, down: u8, min: u8, max: u8) -> u8 {
    let value = i16::from(current) + i16::from(up) - i16::from(down);
    value.clamp(i16::from(min), i16::from(max)) as u8
}

impl Overrides {
    /// Fold feed and rapid requests in. Returns `true` if a value changed.
    pub fn apply_motion(&mut self, requests: MotionOverride, limits: &OverrideLimits) -> bool {
        let before = *self;

        let mut feed = self.feed;
        if requests.contains(MotionOverride::FEED_RESET) {
            feed = DEFAULT_FEED_OVERRIDE;
        }
        let mut up = 0;
        let mut down = 0;
        if requests.contains(MotionOverride::FEED_COARSE_PLUS) {
            up += limits.feed_coarse;
        }
        if requests.contains(MotionOverride::FEED_FINE_PLUS) {
            up += limits.feed_fine;
        }
        if requests.contains(MotionOverride::FEED_COARSE_MINUS) {
            down += limits.feed_coarse;
        }
        if requests.contains(MotionOverride::FEED_FINE_MINUS) {
            down += limits.feed_fine;
        }
        self.feed = step_percent(feed, up, down, limits.feed_min, limits.feed_max);

        if requests.contains(MotionOverride::RAPID_RESET) {
            self.rapid = DEFAULT_RAPID_OVERRIDE;
        }
        if requests.contains(MotionOverride::RAPID_MEDIUM) {
            self.rapid = limits.rapid_medium;
        }
        if requests.contains(MotionOverride::RAPID_LOW) {
            self.rapid = limits.rapid_low;
        }

        *self != before
    }

    /// Fold spindle speed requests in. Stop and coolant toggles are handled
    /// by the protocol. Returns `true` if the value changed.
    pub fn apply_spindle(&mut self, requests: AccessoryOverride, limits: &OverrideLimits) -> bool {
        let before = self.spindle;

        let mut spindle = self.spindle;
        if requests.contains(AccessoryOverride::SPINDLE_RESET) {
            spindle = DEFAULT_SPINDLE_SPEED_OVERRIDE;
        }
        let mut up = 0;
        let mut down = 0;
        if requests.contains(AccessoryOverride::SPINDLE_COARSE_PLUS) {
            up += limits.spindle_coarse;
        }
        if requests.contains(AccessoryOverride::SPINDLE_FINE_PLUS) {
            up += limits.spindle_fine;
        }
        if requests.contains(AccessoryOverride::SPINDLE_COARSE_MINUS) {
            down += limits.spindle_coarse;
        }
        if requests.contains(AccessoryOverride::SPINDLE_FINE_MINUS) {
            down += limits.spindle_fine;
        }
        self.spindle = step_percent(spindle, up, down, limits.spindle_min, limits.spindle_max);

        self.spindle != before
    }
}
