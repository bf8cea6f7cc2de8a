//! System-wide constants for the motion core.
//!
//! Single source of truth for capacities, timing defaults and override
//! limits. Imported by all crates.

/// Number of controlled axes (X, Y, Z).
pub const N_AXIS: usize = 3;

/// Planner ring capacity. One slot is always kept free, so at most
/// `BLOCK_BUFFER_SIZE - 1` blocks are queued at once.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// Highest step rate accepted by settings validation [Hz].
pub const MAX_STEP_RATE_HZ: f32 = 30_000.0;

/// Default pulse interrupt frequency [Hz].
pub const DEFAULT_PULSE_FREQUENCY_HZ: u32 = 30_000;

/// Default speed-update rate of the pulse engine [updates/s].
pub const DEFAULT_ACCELERATION_TICKS_PER_SECOND: u32 = 100;

/// Default number of pulse ticks run per main-loop iteration on the simulated clock.
pub const DEFAULT_TICKS_PER_POLL: u32 = 30;

/// Lowest step-event rate the pulse engine runs at while moving [steps/min].
pub const MINIMUM_STEP_RATE: u32 = 800;

/// Junction speed floor [mm/min].
pub const MINIMUM_JUNCTION_SPEED: f32 = 0.0;

/// Lowest programmed feed rate accepted by the planner [mm/min].
pub const MINIMUM_FEED_RATE: f32 = 1.0;

/// Stand-in for an unbounded squared junction speed (straight line).
pub const SOME_LARGE_VALUE: f32 = 1.0e38;

/// Depth of the outbound report queue.
pub const REPORT_QUEUE_DEPTH: usize = 16;

/// `$1` value that keeps the stepper drivers enabled forever.
pub const STEPPER_IDLE_LOCK_ALWAYS: u8 = 255;

/// First axis setting parameter (`$100`).
pub const AXIS_SETTINGS_START: u16 = 100;

/// Distance between axis setting groups (`$100`, `$110`, ...).
pub const AXIS_SETTINGS_INCREMENT: u16 = 10;

/// Number of per-axis setting groups.
pub const AXIS_N_SETTINGS: u16 = 4;

// ─── Overrides ──────────────────────────────────────────────────────

pub const DEFAULT_FEED_OVERRIDE: u8 = 100;
pub const MAX_FEED_RATE_OVERRIDE: u8 = 200;
pub const MIN_FEED_RATE_OVERRIDE: u8 = 10;
pub const FEED_OVERRIDE_COARSE_INCREMENT: u8 = 10;
pub const FEED_OVERRIDE_FINE_INCREMENT: u8 = 1;

pub const DEFAULT_RAPID_OVERRIDE: u8 = 100;
pub const RAPID_OVERRIDE_MEDIUM: u8 = 50;
pub const RAPID_OVERRIDE_LOW: u8 = 25;

pub const DEFAULT_SPINDLE_SPEED_OVERRIDE: u8 = 100;
pub const MAX_SPINDLE_SPEED_OVERRIDE: u8 = 200;
pub const MIN_SPINDLE_SPEED_OVERRIDE: u8 = 10;
pub const SPINDLE_OVERRIDE_COARSE_INCREMENT: u8 = 10;
pub const SPINDLE_OVERRIDE_FINE_INCREMENT: u8 = 1;

/// Default configuration file path for the simulator binary.
pub const DEFAULT_CONFIG_PATH: &str = "config/machine.toml";
