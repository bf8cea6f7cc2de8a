//! System state shared by every execution context.
//!
//! One [`SystemState`] lives for the whole process behind an `Arc`. The
//! serial interrupt, pin-change interrupts and the pulse engine only set
//! flags or small scalars here; the main loop drains them.
//!
//! Writers per field:
//!
//! | field                    | written by                     | read by            |
//! |--------------------------|--------------------------------|--------------------|
//! | `state`                  | main loop                      | all                |
//! | `exec_state`             | any context (set), main (take) | main loop          |
//! | `exec_alarm`             | any context (set), main (take) | main loop          |
//! | `step_control`           | serial/pin ISR, main loop      | pulse engine       |
//! | `suspend`                | main loop, pulse engine        | main loop          |
//! | override requests        | serial ISR (set), main (take)  | main loop          |
//! | override values          | main loop                      | pulse engine       |
//! | `position`, `rate`       | pulse engine                   | main loop          |

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU16, Ordering};

use bitflags::{Flags, bitflags};
use cnc_common::axis::AxisMask;
use cnc_common::consts::{
    DEFAULT_FEED_OVERRIDE, DEFAULT_RAPID_OVERRIDE, DEFAULT_SPINDLE_SPEED_OVERRIDE, N_AXIS,
};
use cnc_common::error::Alarm;
use cnc_common::state::MachineState;
use portable_atomic::AtomicF32;

// ─── Atomic Flag Set ────────────────────────────────────────────────

/// A bitflags value stored in one atomic word.
///
/// `set`, `clear`, `take` and `take_flags` are each a single atomic
/// read-modify-write, so bits raised concurrently by different interrupt
/// sources are never lost. `load` is a plain snapshot.
#[derive(Debug)]
pub struct AtomicFlags<F> {
    bits: AtomicU16,
    _flags: PhantomData<fn() -> F>,
}

impl<F: Flags<Bits = u16>> AtomicFlags<F> {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU16::new(0),
            _flags: PhantomData,
        }
    }

    /// Raise `flags` (indivisible OR).
    #[inline]
    pub fn set(&self, flags: F) {
        self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Drop `flags` (indivisible AND-NOT).
    #[inline]
    pub fn clear(&self, flags: F) {
        self.bits.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Test-and-clear everything: returns all raised flags and leaves none.
    #[inline]
    pub fn take(&self) -> F {
        F::from_bits_retain(self.bits.swap(0, Ordering::AcqRel))
    }

    /// Test-and-clear only `flags`, returning the subset that was raised.
    #[inline]
    pub fn take_flags(&self, flags: F) -> F {
        let before = self.bits.fetch_and(!flags.bits(), Ordering::AcqRel);
        F::from_bits_retain(before & flags.bits())
    }

    /// Snapshot of the raised flags.
    #[inline]
    pub fn load(&self) -> F {
        F::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn contains(&self, flags: F) -> bool {
        self.load().contains(flags)
    }
}

impl<F: Flags<Bits = u16>> Default for AtomicFlags<F> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Flag Definitions ───────────────────────────────────────────────

bitflags! {
    /// Pending realtime execution requests, drained by the main loop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecState: u16 {
        const STATUS_REPORT = 0x0001;
        const CYCLE_START   = 0x0002;
        /// Raised by the pulse engine when motion stops (queue drained or hold complete).
        const CYCLE_STOP    = 0x0004;
        const FEED_HOLD     = 0x0008;
        const RESET         = 0x0010;
        const SAFETY_DOOR   = 0x0020;
        const MOTION_CANCEL = 0x0040;
        const SLEEP         = 0x0080;
        const DEBUG_REPORT  = 0x0100;
    }
}

bitflags! {
    /// Suspend bookkeeping for hold, door and jog cancel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Suspend: u16 {
        /// Motion has decelerated to zero.
        const HOLD_COMPLETE    = 0x0001;
        /// Door was opened and has not been cleared by a resume yet.
        const SAFETY_DOOR_AJAR = 0x0002;
        /// Jog is being cancelled; flush the queue once stopped.
        const JOG_CANCEL       = 0x0004;
        /// Spindle stopped by override during hold.
        const SPINDLE_STOP_OVR = 0x0008;
    }
}

bitflags! {
    /// Commands to the pulse engine, checked on every tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StepControl: u16 {
        /// Decelerate to zero and keep the rest of the block.
        const EXECUTE_HOLD = 0x0001;
        /// Zero all outputs and discard everything now.
        const ABORT        = 0x0002;
    }
}

bitflags! {
    /// Pending feed/rapid override requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MotionOverride: u16 {
        const FEED_RESET        = 0x0001;
        const FEED_COARSE_PLUS  = 0x0002;
        const FEED_COARSE_MINUS = 0x0004;
        const FEED_FINE_PLUS    = 0x0008;
        const FEED_FINE_MINUS   = 0x0010;
        const RAPID_RESET       = 0x0020;
        const RAPID_MEDIUM      = 0x0040;
        const RAPID_LOW         = 0x0080;
    }
}

bitflags! {
    /// Pending spindle/coolant override requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessoryOverride: u16 {
        const SPINDLE_RESET        = 0x0001;
        const SPINDLE_COARSE_PLUS  = 0x0002;
        const SPINDLE_COARSE_MINUS = 0x0004;
        const SPINDLE_FINE_PLUS    = 0x0008;
        const SPINDLE_FINE_MINUS   = 0x0010;
        const SPINDLE_STOP         = 0x0020;
        const FLOOD_TOGGLE         = 0x0040;
        const MIST_TOGGLE          = 0x0080;
    }
}

// ─── System State ───────────────────────────────────────────────────

/// Process-wide machine state.
#[derive(Debug)]
pub struct SystemState {
    state: AtomicU8,
    pub exec_state: AtomicFlags<ExecState>,
    exec_alarm: AtomicU8,
    pub suspend: AtomicFlags<Suspend>,
    pub step_control: AtomicFlags<StepControl>,
    pub motion_override: AtomicFlags<MotionOverride>,
    pub accessory_override: AtomicFlags<AccessoryOverride>,
    feed_override: AtomicU8,
    rapid_override: AtomicU8,
    spindle_override: AtomicU8,
    hard_limits: AtomicBool,
    homing_limits: AtomicU8,
    position: [AtomicI32; N_AXIS],
    realtime_rate: AtomicF32,
}

impl SystemState {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(MachineState::Idle as u8),
            exec_state: AtomicFlags::new(),
            exec_alarm: AtomicU8::new(0),
            suspend: AtomicFlags::new(),
            step_control: AtomicFlags::new(),
            motion_override: AtomicFlags::new(),
            accessory_override: AtomicFlags::new(),
            feed_override: AtomicU8::new(DEFAULT_FEED_OVERRIDE),
            rapid_override: AtomicU8::new(DEFAULT_RAPID_OVERRIDE),
            spindle_override: AtomicU8::new(DEFAULT_SPINDLE_SPEED_OVERRIDE),
            hard_limits: AtomicBool::new(false),
            homing_limits: AtomicU8::new(0),
            position: [const { AtomicI32::new(0) }; N_AXIS],
            realtime_rate: AtomicF32::new(0.0),
        }
    }

    // ── Machine state (main loop writes) ──

    #[inline]
    pub fn state(&self) -> MachineState {
        MachineState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    #[inline]
    pub fn set_state(&self, state: MachineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    // ── Requests from interrupt contexts ──

    /// Soft reset: the pulse engine halts on its next tick, the main loop
    /// reinitializes on its next pass.
    pub fn request_reset(&self) {
        self.step_control.set(StepControl::ABORT);
        self.exec_state.set(ExecState::RESET);
    }

    /// Raise an alarm. The first alarm raised wins until the main loop takes it.
    pub fn set_alarm(&self, alarm: Alarm) {
        let _ = self.exec_alarm.compare_exchange(
            0,
            alarm.code(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Test-and-clear the pending alarm.
    pub fn take_alarm(&self) -> Option<Alarm> {
        Alarm::from_u8(self.exec_alarm.swap(0, Ordering::AcqRel))
    }

    // ── Override values (main loop writes, pulse engine reads) ──

    #[inline]
    pub fn feed_override(&self) -> u8 {
        self.feed_override.load(Ordering::Acquire)
    }

    #[inline]
    pub fn rapid_override(&self) -> u8 {
        self.rapid_override.load(Ordering::Acquire)
    }

    #[inline]
    pub fn spindle_override(&self) -> u8 {
        self.spindle_override.load(Ordering::Acquire)
    }

    pub fn store_overrides(&self, feed: u8, rapid: u8, spindle: u8) {
        self.feed_override.store(feed, Ordering::Release);
        self.rapid_override.store(rapid, Ordering::Release);
        self.spindle_override.store(spindle, Ordering::Release);
    }

    // ── Limits ──

    #[inline]
    pub fn hard_limits_enabled(&self) -> bool {
        self.hard_limits.load(Ordering::Acquire)
    }

    pub fn set_hard_limits_enabled(&self, enabled: bool) {
        self.hard_limits.store(enabled, Ordering::Release);
    }

    /// Record limit switches tripped during a homing cycle.
    pub fn latch_homing_limits(&self, mask: AxisMask) {
        self.homing_limits.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    /// Test-and-clear the latched homing switches.
    pub fn take_homing_limits(&self) -> AxisMask {
        AxisMask::from_bits_truncate(self.homing_limits.swap(0, Ordering::AcqRel))
    }

    // ── Position and speed (pulse engine writes) ──

    /// Machine position in steps.
    pub fn position(&self) -> [i32; N_AXIS] {
        std::array::from_fn(|axis| self.position[axis].load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn step_axis(&self, axis: usize, reverse: bool) {
        let delta = if reverse { -1 } else { 1 };
        self.position[axis].fetch_add(delta, Ordering::Relaxed);
    }

    /// Overwrite the machine position. Only while the pulse engine is idle.
    pub fn set_position(&self, steps: [i32; N_AXIS]) {
        for (cell, value) in self.position.iter().zip(steps) {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Current commanded feed [mm/min].
    #[inline]
    pub fn realtime_rate(&self) -> f32 {
        self.realtime_rate.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_realtime_rate(&self, rate: f32) {
        self.realtime_rate.store(rate, Ordering::Relaxed);
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}
