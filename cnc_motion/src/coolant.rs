//! Flood and mist coolant outputs.

use cnc_common::state::CoolantState;

use crate::hal::MotionHal;

/// Coolant driver on top of a [`MotionHal`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Coolant {
    state: CoolantState,
}

impl Coolant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state<H: MotionHal>(&mut self, hal: &mut H, state: CoolantState) {
        self.state = state;
        hal.set_coolant(state);
    }

    /// Flip the given outputs (realtime toggle).
    pub fn toggle<H: MotionHal>(&mut self, hal: &mut H, outputs: CoolantState) {
        self.set_state(hal, self.state ^ outputs);
    }

    pub fn stop<H: MotionHal>(&mut self, hal: &mut H) {
        self.set_state(hal, CoolantState::empty());
    }

    pub fn state(&self) -> CoolantState {
        self.state
    }
}
