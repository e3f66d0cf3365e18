//! Status word decoding.
//!
//! `MEX>STATUS?` is answered with `DIS_COF_DIRECT_ERR_{code}`, where `code` is
//! a decimal 8-bit status word:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | 0-1 | axis moving |
//! | 2   | reserved |
//! | 3-5 | fault |
//! | 6   | limit-low switch engaged |
//! | 7   | limit-high switch engaged |
//!
//! A set fault bit wins over the moving bits when deriving [`DeviceState`].

use crate::error::{MexError, MexResult};
use std::fmt;
use std::num::IntErrorKind;

/// Literal prefix of every status reply. The code follows without a delimiter.
pub const STATUS_PREFIX: &str = "DIS_COF_DIRECT_ERR_";

const MOVING_MASK: u8 = 0b0000_0011;
const FAULT_MASK: u8 = 0b0011_1000;
const LIMIT_LOW_BIT: u8 = 6;
const LIMIT_HIGH_BIT: u8 = 7;

/// Raw 8-bit status word with named accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceStatus(u8);

impl DeviceStatus {
    /// Wrap a raw status byte.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw status byte.
    pub fn bits(&self) -> u8 {
        self.0
    }

    fn bit(&self, index: u8) -> bool {
        (self.0 >> index) & 1 == 1
    }

    /// Any of bits 0-1 set.
    pub fn is_moving(&self) -> bool {
        self.0 & MOVING_MASK != 0
    }

    /// Any of bits 3-5 set.
    pub fn has_fault(&self) -> bool {
        self.0 & FAULT_MASK != 0
    }

    /// Low limit switch (bit 6).
    pub fn limit_low(&self) -> bool {
        self.bit(LIMIT_LOW_BIT)
    }

    /// High limit switch (bit 7).
    pub fn limit_high(&self) -> bool {
        self.bit(LIMIT_HIGH_BIT)
    }

    /// Derived device state, see [`derive_state`].
    pub fn state(&self) -> DeviceState {
        derive_state(*self)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}

/// Operating state derived from a [`DeviceStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Idle and healthy
    On,
    /// Motion in progress
    Moving,
    /// At least one fault bit set
    Fault,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceState::On => "ON",
            DeviceState::Moving => "MOVING",
            DeviceState::Fault => "FAULT",
        };
        f.write_str(label)
    }
}

/// Wrap a status code in a [`DeviceStatus`].
pub fn decode(code: u8) -> DeviceStatus {
    DeviceStatus::from_bits(code)
}

/// Derive the device state: motion picks ON or MOVING, then any fault
/// overrides both.
pub fn derive_state(status: DeviceStatus) -> DeviceState {
    let motion = if status.is_moving() {
        DeviceState::Moving
    } else {
        DeviceState::On
    };

    if status.has_fault() {
        DeviceState::Fault
    } else {
        motion
    }
}

/// Extract the status code from a status reply.
///
/// # Errors
///
/// - [`MexError::StatusPrefixMismatch`] if `raw` does not start with [`STATUS_PREFIX`]
/// - [`MexError::ValueParse`] if the suffix is not a non-negative integer
/// - [`MexError::Range`] if the code is larger than 255
pub fn parse_status(raw: &str) -> MexResult<u8> {
    let suffix = raw
        .strip_prefix(STATUS_PREFIX)
        .ok_or_else(|| MexError::StatusPrefixMismatch {
            reply: raw.to_string(),
        })?
        .trim();

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MexError::ValueParse {
            payload: suffix.to_string(),
            reason: "expected a non-negative integer status code".to_string(),
        });
    }

    let code = suffix.parse::<u64>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => MexError::Range { code: u64::MAX },
        _ => MexError::ValueParse {
            payload: suffix.to_string(),
            reason: e.to_string(),
        },
    })?;

    u8::try_from(code).map_err(|_| MexError::Range { code })
}
