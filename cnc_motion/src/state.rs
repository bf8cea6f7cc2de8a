//! Protocol state machine and override bookkeeping.
//!
//! - [`machine`] - machine state transition table
//! - [`overrides`] - feed, rapid and spindle override values

pub mod machine;
pub mod overrides;
