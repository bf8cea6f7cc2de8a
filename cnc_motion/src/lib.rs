//! # CNC Motion Core
//!
//! Real-time motion core for a three-axis step/direction machine. Accepts
//! straight-line moves from a program producer, plans acceleration-limited
//! speed profiles across a look-ahead queue, and turns them into step
//! pulses on a fixed-rate tick, while a protocol state machine handles
//! feed hold, safety door, jog cancel, overrides, alarms and reset.
//!
//! ## Execution Contexts
//!
//! 1. **Main loop**: [`controller::Controller`] with the [`planner`], the
//!    protocol pass and every producer-side operation.
//! 2. **Pulse tick**: [`stepper::Stepper`], driven once per tick.
//! 3. **Interrupts**: [`realtime::RealtimeHandle`], which only raises
//!    flags in [`system::SystemState`].
//!
//! The planner and the pulse engine share nothing but the lock-free
//! [`buffer`] ring and the atomics in [`system`].
//!
//! ## Zero-Allocation Tick
//!
//! The ring, the report queue and every per-block value are fixed-size and
//! allocated at construction. Ticking and planning never touch the heap.

#![deny(clippy::disallowed_types)]

pub mod buffer;
pub mod config;
pub mod controller;
pub mod coolant;
pub mod error;
pub mod hal;
pub mod job;
pub mod planner;
pub mod profile;
pub mod realtime;
pub mod report;
pub mod sim;
pub mod spindle;
pub mod state;
pub mod stepper;
pub mod system;

use cnc_common::consts::REPORT_QUEUE_DEPTH;
use static_assertions::const_assert;

const_assert!(REPORT_QUEUE_DEPTH >= 1);
