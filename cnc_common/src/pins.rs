//! Control pin bit masks.

use bitflags::bitflags;

bitflags! {
    /// Operator control inputs sampled by the pin-change interrupt.
    ///
    /// `RESET` is a soft reset; `ESTOP` additionally raises the e-stop alarm.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlPins: u8 {
        const RESET       = 0x01;
        const FEED_HOLD   = 0x02;
        const CYCLE_START = 0x04;
        const SAFETY_DOOR = 0x08;
        const ESTOP       = 0x10;
    }
}

impl Default for ControlPins {
    fn default() -> Self {
        Self::empty()
    }
}
