//! Axis indices and per-axis bit masks.
//!
//! Bit `n` of an [`AxisMask`] refers to axis index `n`. The same mask type
//! carries step bits, direction bits, invert masks and limit pin states.

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::consts::N_AXIS;

const_assert!(N_AXIS <= 8);

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

/// Report letters, indexed by axis.
pub const AXIS_NAMES: [char; N_AXIS] = ['X', 'Y', 'Z'];

bitflags! {
    /// One bit per axis.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AxisMask: u8 {
        const X = 1 << X_AXIS;
        const Y = 1 << Y_AXIS;
        const Z = 1 << Z_AXIS;
    }
}

impl AxisMask {
    /// Mask with only `axis` set. Indices past `N_AXIS` yield an empty mask.
    #[inline]
    pub const fn axis(axis: usize) -> Self {
        if axis < N_AXIS {
            Self::from_bits_truncate(1 << axis)
        } else {
            Self::empty()
        }
    }

    /// Whether `axis` is set.
    #[inline]
    pub const fn has_axis(&self, axis: usize) -> bool {
        self.contains(Self::axis(axis))
    }

    /// Build a mask from a raw settings byte, dropping bits for absent axes.
    #[inline]
    pub const fn from_setting(value: u8) -> Self {
        Self::from_bits_truncate(value)
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        Self::empty()
    }
}
