//! Prelude module for common re-exports.
//!
//! ```rust
//! use cnc_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::settings::{AxisSettings, Settings, SpindleSettings};

// ─── Axes / Pins ────────────────────────────────────────────────────
pub use crate::axis::{AXIS_NAMES, AxisMask};
pub use crate::pins::ControlPins;

// ─── State / Errors ─────────────────────────────────────────────────
pub use crate::error::{Alarm, StatusCode};
pub use crate::realtime::RealtimeCommand;
pub use crate::state::{CoolantState, MachineState, SpindleState};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{BLOCK_BUFFER_SIZE, N_AXIS};
