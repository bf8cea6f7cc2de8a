//! CNC Common Library
//!
//! Shared constants, state enums, alarm and status codes, the realtime
//! command byte table, the machine settings model and TOML configuration
//! loading for the motion core.
//!
//! # Module Structure
//!
//! - [`consts`] - Build-time capacities, timing defaults and override limits
//! - [`axis`] - Axis indices and step/direction bit masks
//! - [`pins`] - Control pin bit masks
//! - [`state`] - Machine, spindle and coolant state enums
//! - [`error`] - Status codes for rejected commands and alarm codes
//! - [`realtime`] - Single-byte realtime command codes
//! - [`settings`] - Machine settings and `$n=value` write semantics
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience

pub mod axis;
pub mod config;
pub mod consts;
pub mod error;
pub mod pins;
pub mod prelude;
pub mod realtime;
pub mod settings;
pub mod state;
