//! Single-byte realtime command codes.
//!
//! These bytes are picked out of the serial stream by interrupt-level code
//! and never reach the line buffer.

/// A recognised realtime command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RealtimeCommand {
    Reset = 0x18,
    StatusReport = b'?',
    CycleStart = b'~',
    FeedHold = b'!',
    SafetyDoor = 0x84,
    JogCancel = 0x85,
    DebugReport = 0x86,
    FeedOverrideReset = 0x90,
    FeedOverrideCoarsePlus = 0x91,
    FeedOverrideCoarseMinus = 0x92,
    FeedOverrideFinePlus = 0x93,
    FeedOverrideFineMinus = 0x94,
    RapidOverrideReset = 0x95,
    RapidOverrideMedium = 0x96,
    RapidOverrideLow = 0x97,
    SpindleOverrideReset = 0x99,
    SpindleOverrideCoarsePlus = 0x9A,
    SpindleOverrideCoarseMinus = 0x9B,
    SpindleOverrideFinePlus = 0x9C,
    SpindleOverrideFineMinus = 0x9D,
    SpindleOverrideStop = 0x9E,
    CoolantFloodToggle = 0xA0,
    CoolantMistToggle = 0xA1,
}

impl RealtimeCommand {
    /// Decode a byte. Returns `None` for anything that is not a realtime command.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x18 => Self::Reset,
            b'?' => Self::StatusReport,
            b'~' => Self::CycleStart,
            b'!' => Self::FeedHold,
            0x84 => Self::SafetyDoor,
            0x85 => Self::JogCancel,
            0x86 => Self::DebugReport,
            0x90 => Self::FeedOverrideReset,
            0x91 => Self::FeedOverrideCoarsePlus,
            0x92 => Self::FeedOverrideCoarseMinus,
            0x93 => Self::FeedOverrideFinePlus,
            0x94 => Self::FeedOverrideFineMinus,
            0x95 => Self::RapidOverrideReset,
            0x96 => Self::RapidOverrideMedium,
            0x97 => Self::RapidOverrideLow,
            0x99 => Self::SpindleOverrideReset,
            0x9A => Self::SpindleOverrideCoarsePlus,
            0x9B => Self::SpindleOverrideCoarseMinus,
            0x9C => Self::SpindleOverrideFinePlus,
            0x9D => Self::SpindleOverrideFineMinus,
            0x9E => Self::SpindleOverrideStop,
            0xA0 => Self::CoolantFloodToggle,
            0xA1 => Self::CoolantMistToggle,
            _ => return None,
        })
    }

    /// Raw byte value.
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }
}
