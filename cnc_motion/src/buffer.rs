//! Segment buffer: the planner queue between the main loop and the pulse engine.
//!
//! A fixed-capacity ring of [`MotionBlock`]s split into a [`BlockProducer`]
//! (main loop, owned by the planner) and a [`BlockConsumer`] (pulse
//! interrupt, owned by the stepper). There is no lock:
//!
//! - `tail` has exactly one writer, the producer. It is published with
//!   `Release` only after the slot behind it is fully written.
//! - `head` has exactly one writer, the consumer. It is published with
//!   `Release` after the consumer has copied what it needs from the slot.
//!
//! One slot always stays unused so `head == tail` means empty. That slot
//! is the one just behind `head`: the block the pulse engine is executing.
//! It stays intact until the engine loads the next block, which lets the
//! planner keep refining its exit speed.
//!
//! After enqueue, only the speed fields of a block change, and they are
//! atomics.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;
use cnc_common::axis::AxisMask;
use cnc_common::consts::{BLOCK_BUFFER_SIZE, N_AXIS};
use portable_atomic::AtomicF32;
use static_assertions::const_assert;

const_assert!(BLOCK_BUFFER_SIZE >= 2);

bitflags! {
    /// Per-block motion flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockCondition: u8 {
        /// Rapid traverse; scaled by the rapid override.
        const RAPID  = 0x01;
        /// Jog motion; cancellable with the jog-cancel command.
        const JOG    = 0x02;
        /// Homing or other system motion; ignores overrides.
        const SYSTEM = 0x04;
    }
}

// ─── Motion Block ───────────────────────────────────────────────────

/// One straight-line move with fixed step counts and a planned speed profile.
///
/// Speeds are stored squared [mm²/min²]. Only `max_entry_speed_sqr`,
/// `entry_speed_sqr` and `exit_speed_sqr` change after the block is queued.
#[derive(Debug)]
pub struct MotionBlock {
    /// Step magnitude per axis.
    pub steps: [u32; N_AXIS],
    /// Axes that move in the negative direction.
    pub direction: AxisMask,
    /// Largest per-axis step count; the block length in step events.
    pub step_event_count: u32,
    /// Euclidean length [mm].
    pub millimeters: f32,
    /// Acceleration along the move [mm/min²].
    pub acceleration: f32,
    /// Programmed speed [mm/min].
    pub nominal_speed: f32,
    /// Axis-limited speed ceiling along the move [mm/min].
    pub rapid_rate: f32,
    pub condition: BlockCondition,
    /// Junction limit with the previous block.
    pub max_junction_speed_sqr: f32,
    /// min(junction limit, own nominal, previous nominal), nominals taken
    /// with the overrides in force when last planned.
    pub(crate) max_entry_speed_sqr: AtomicF32,
    pub(crate) entry_speed_sqr: AtomicF32,
    pub(crate) exit_speed_sqr: AtomicF32,
}

impl Default for MotionBlock {
    fn default() -> Self {
        Self {
            steps: [0; N_AXIS],
            direction: AxisMask::empty(),
            step_event_count: 0,
            millimeters: 0.0,
            acceleration: 0.0,
            nominal_speed: 0.0,
            rapid_rate: 0.0,
            condition: BlockCondition::empty(),
            max_junction_speed_sqr: 0.0,
            max_entry_speed_sqr: AtomicF32::new(0.0),
            entry_speed_sqr: AtomicF32::new(0.0),
            exit_speed_sqr: AtomicF32::new(0.0),
        }
    }
}

/// Speed a block should cruise at once overrides are applied [mm/min].
///
/// System motion ignores overrides. Rapids scale by the rapid override;
/// feeds by the feed override, capped at the axis-limited rate.
#[inline]
pub fn profile_nominal_speed(
    nominal_speed: f32,
    rapid_rate: f32,
    condition: BlockCondition,
    feed_override: u8,
    rapid_override: u8,
) -> f32 {
    if condition.contains(BlockCondition::SYSTEM) {
        nominal_speed
    } else if condition.contains(BlockCondition::RAPID) {
        nominal_speed * f32::from(rapid_override) / 100.0
    } else {
        (nominal_speed * f32::from(feed_override) / 100.0).min(rapid_rate)
    }
}

impl MotionBlock {
    /// Nominal speed under the given overrides [mm/min].
    #[inline]
    pub fn profile_nominal_speed(&self, feed_override: u8, rapid_override: u8) -> f32 {
        profile_nominal_speed(
            self.nominal_speed,
            self.rapid_rate,
            self.condition,
            feed_override,
            rapid_override,
        )
    }

    #[inline]
    pub fn max_entry_speed_sqr(&self) -> f32 {
        self.max_entry_speed_sqr.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_entry_speed_sqr(&self, value: f32) {
        self.max_entry_speed_sqr.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn entry_speed_sqr(&self) -> f32 {
        self.entry_speed_sqr.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn exit_speed_sqr(&self) -> f32 {
        self.exit_speed_sqr.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_entry_speed_sqr(&self, value: f32) {
        self.entry_speed_sqr.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_exit_speed_sqr(&self, value: f32) {
        self.exit_speed_sqr.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn nominal_speed_sqr(&self) -> f32 {
        self.nominal_speed * self.nominal_speed
    }

    /// Highest squared speed reachable from `entry_sqr` over the whole block.
    #[inline]
    pub fn reachable_speed_sqr(&self, entry_sqr: f32) -> f32 {
        entry_sqr + 2.0 * self.acceleration * self.millimeters
    }
}

// ─── Ring Storage ───────────────────────────────────────────────────

struct Shared<const N: usize> {
    slots: [UnsafeCell<MotionBlock>; N],
    /// Next block to execute. Written by the consumer only.
    head: AtomicUsize,
    /// Next free slot. Written by the producer only.
    tail: AtomicUsize,
    /// The slot behind `head` holds the block under execution. Consumer only.
    executing: AtomicBool,
    /// Number of blocks loaded so far. Consumer only.
    loads: AtomicU32,
}

// SAFETY: slot contents are written by the producer only while the slot is
// outside [head, tail) and is not the executing slot; the consumer only reads
// slots inside that range or the executing slot. Index hand-over uses
// Release/Acquire, so a published slot is fully written before it is read.
unsafe impl<const N: usize> Sync for Shared<N> {}

#[inline]
const fn next_index<const N: usize>(index: usize) -> usize {
    if index + 1 == N { 0 } else { index + 1 }
}

#[inline]
const fn prev_index<const N: usize>(index: usize) -> usize {
    if index == 0 { N - 1 } else { index - 1 }
}

#[inline]
const fn occupied<const N: usize>(head: usize, tail: usize) -> usize {
    (tail + N - head) % N
}

impl<const N: usize> Shared<N> {
    /// # Safety
    ///
    /// `index` must be a published slot (inside `[head, tail)`) or the
    /// executing slot, so no `&mut` to it can exist.
    #[inline]
    unsafe fn slot(&self, index: usize) -> &MotionBlock {
        // SAFETY: guaranteed by the caller.
        unsafe { &*self.slots[index].get() }
    }
}

/// Constructor for the producer/consumer pair.
pub struct SegmentBuffer<const N: usize = BLOCK_BUFFER_SIZE>;

impl<const N: usize> SegmentBuffer<N> {
    /// Allocate an empty ring and split it into its two ends.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (BlockProducer<N>, BlockConsumer<N>) {
        const { assert!(N >= 2, "segment buffer needs at least two slots") };
        let shared = Arc::new(Shared {
            slots: std::array::from_fn(|_| UnsafeCell::new(MotionBlock::default())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            executing: AtomicBool::new(false),
            loads: AtomicU32::new(0),
        });
        (
            BlockProducer {
                shared: Arc::clone(&shared),
            },
            BlockConsumer { shared },
        )
    }
}

// ─── Producer ───────────────────────────────────────────────────────

/// Main-loop end of the ring.
pub struct BlockProducer<const N: usize = BLOCK_BUFFER_SIZE> {
    shared: Arc<Shared<N>>,
}

/// The block the pulse engine is running, as seen from the producer.
#[derive(Debug, Clone, Copy)]
pub struct ExecutingBlock<'a> {
    pub index: usize,
    /// Load count at the time this block was loaded; unique per load.
    pub sequence: u32,
    pub block: &'a MotionBlock,
}

impl<const N: usize> BlockProducer<N> {
    /// Usable capacity.
    pub const CAPACITY: usize = N - 1;

    /// Queue `block`. Hands it back when the ring is full.
    pub fn enqueue(&mut self, block: MotionBlock) -> Result<(), MotionBlock> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let next = next_index::<N>(tail);
        if next == self.shared.head.load(Ordering::Acquire) {
            return Err(block);
        }
        // SAFETY: `tail` is outside [head, tail) and is not the executing
        // slot (that one is head - 1, which equals tail only when full).
        // The consumer never touches it until `tail` is published below.
        unsafe {
            *self.shared.slots[tail].get() = block;
        }
        self.shared.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Queued blocks, oldest first. The executing block is not included.
    pub fn queued(&self) -> heapless::Vec<&MotionBlock, N> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let mut index = self.shared.head.load(Ordering::Acquire);
        let mut blocks = heapless::Vec::new();
        while index != tail {
            // SAFETY: inside [head, tail) at the time head was read; the
            // consumer may have moved past it since, but only the producer
            // (us) ever rewrites a slot.
            let block = unsafe { self.shared.slot(index) };
            if blocks.push(block).is_err() {
                break;
            }
            index = next_index::<N>(index);
        }
        blocks
    }

    /// Most recently queued block.
    pub fn newest(&self) -> Option<&MotionBlock> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        if tail == self.shared.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: tail - 1 is published and only we rewrite slots.
        Some(unsafe { self.shared.slot(prev_index::<N>(tail)) })
    }

    /// The block currently under execution, if any.
    pub fn executing(&self) -> Option<ExecutingBlock<'_>> {
        let head = self.shared.head.load(Ordering::Acquire);
        if !self.shared.executing.load(Ordering::Acquire) {
            return None;
        }
        let index = prev_index::<N>(head);
        // SAFETY: the executing slot is never written while the consumer
        // can still read it, and only we write slots.
        Some(ExecutingBlock {
            index,
            sequence: self.shared.loads.load(Ordering::Acquire),
            block: unsafe { self.shared.slot(index) },
        })
    }

    pub fn len(&self) -> usize {
        occupied::<N>(
            self.shared.head.load(Ordering::Acquire),
            self.shared.tail.load(Ordering::Relaxed),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == Self::CAPACITY
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        Self::CAPACITY - self.len()
    }
}

// ─── Consumer ───────────────────────────────────────────────────────

/// Pulse-interrupt end of the ring.
pub struct BlockConsumer<const N: usize = BLOCK_BUFFER_SIZE> {
    shared: Arc<Shared<N>>,
}

impl<const N: usize> BlockConsumer<N> {
    /// Next block to execute, without removing it.
    pub fn peek_head(&self) -> Option<&MotionBlock> {
        let head = self.shared.head.load(Ordering::Relaxed);
        if head == self.shared.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: head is inside [head, tail) and was published by the
        // producer's Release store of tail, observed above with Acquire.
        Some(unsafe { self.shared.slot(head) })
    }

    /// Advance past the head block, which becomes the executing block.
    ///
    /// Returns `false` when the ring is empty.
    pub fn dequeue_head(&mut self) -> bool {
        let head = self.shared.head.load(Ordering::Relaxed);
        if head == self.shared.tail.load(Ordering::Acquire) {
            return false;
        }
        self.shared.executing.store(true, Ordering::Release);
        self.shared.loads.fetch_add(1, Ordering::AcqRel);
        self.shared.head.store(next_index::<N>(head), Ordering::Release);
        true
    }

    /// The block loaded by the last `dequeue_head`, while still executing.
    pub fn executing(&self) -> Option<&MotionBlock> {
        if !self.shared.executing.load(Ordering::Relaxed) {
            return None;
        }
        let head = self.shared.head.load(Ordering::Relaxed);
        // SAFETY: the producer never writes the slot behind head.
        Some(unsafe { self.shared.slot(prev_index::<N>(head)) })
    }

    /// Release the executing block.
    pub fn finish_executing(&mut self) {
        self.shared.executing.store(false, Ordering::Release);
    }

    /// Drop every queued block and the executing one.
    ///
    /// Only call while the pulse engine is halted or being halted.
    pub fn discard_all(&mut self) {
        self.shared.executing.store(false, Ordering::Release);
        let tail = self.shared.tail.load(Ordering::Acquire);
        self.shared.head.store(tail, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        occupied::<N>(
            self.shared.head.load(Ordering::Relaxed),
            self.shared.tail.load(Ordering::Acquire),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring indices `(head, tail)` for debug reports.
    pub fn indices(&self) -> (usize, usize) {
        (
            self.shared.head.load(Ordering::Relaxed),
            self.shared.tail.load(Ordering::Acquire),
        )
    }
}
