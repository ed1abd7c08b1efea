//! Fixed-layout scalar types that have no direct standard library equivalent.
//!
//! ## Byte layouts
//! ```text
//! Timestamp: [ticks: i64 LE]   100 ns units since 0001-01-01T00:00:00Z
//! Decimal:   [lo: u32 LE] [mid: u32 LE] [hi: u32 LE] [flags: u32 LE]
//!            flags bits 16..=23 = scale (0..=28), bit 31 = sign
//! ```

use crate::error::{ProtocolError, Result};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ticks between 0001-01-01 and 1970-01-01.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

const NANOS_PER_TICK: u128 = 100;

/// UTC point in time stored as a 64-bit tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    ticks: i64,
}

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Timestamp = Timestamp {
        ticks: UNIX_EPOCH_TICKS,
    };

    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    pub const fn ticks(self) -> i64 {
        self.ticks
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert from `SystemTime`, truncating to tick precision and saturating
    /// at the representable range.
    pub fn from_system_time(time: SystemTime) -> Self {
        let delta = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i128::try_from(after.as_nanos() / NANOS_PER_TICK).unwrap_or(i128::MAX),
            Err(before) => {
                -i128::try_from(before.duration().as_nanos() / NANOS_PER_TICK).unwrap_or(i128::MAX)
            }
        };
        let ticks = i128::from(UNIX_EPOCH_TICKS).saturating_add(delta);
        Self {
            ticks: ticks.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
        }
    }

    /// Convert to `SystemTime`; `None` when the platform clock cannot
    /// represent the instant.
    pub fn to_system_time(self) -> Option<SystemTime> {
        let delta = i128::from(self.ticks) - i128::from(UNIX_EPOCH_TICKS);
        let nanos = delta.unsigned_abs() * NANOS_PER_TICK;
        let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
        let magnitude = Duration::new(secs, (nanos % 1_000_000_000) as u32);
        if delta >= 0 {
            UNIX_EPOCH.checked_add(magnitude)
        } else {
            UNIX_EPOCH.checked_sub(magnitude)
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

const MAX_SCALE: u32 = 28;
const SCALE_SHIFT: u32 = 16;
const SIGN_MASK: u32 = 0x8000_0000;
const SCALE_MASK: u32 = 0x00FF_0000;
const MANTISSA_LIMIT: u128 = 1 << 96;

/// 128-bit decimal: a 96-bit integer mantissa scaled by a power of ten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    lo: u32,
    mid: u32,
    hi: u32,
    flags: u32,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal {
        lo: 0,
        mid: 0,
        hi: 0,
        flags: 0,
    };

    /// Build `mantissa * 10^-scale`.
    ///
    /// # Errors
    /// `InvalidArgument` when the mantissa does not fit 96 bits or the scale exceeds 28.
    pub fn new(mantissa: i128, scale: u32) -> Result<Self> {
        if scale > MAX_SCALE {
            return Err(ProtocolError::InvalidArgument(format!(
                "decimal scale {scale} exceeds {MAX_SCALE}"
            )));
        }
        let magnitude = mantissa.unsigned_abs();
        if magnitude >= MANTISSA_LIMIT {
            return Err(ProtocolError::InvalidArgument(
                "decimal mantissa exceeds 96 bits".into(),
            ));
        }
        let mut flags = scale << SCALE_SHIFT;
        if mantissa < 0 {
            flags |= SIGN_MASK;
        }
        Ok(Self {
            lo: magnitude as u32,
            mid: (magnitude >> 32) as u32,
            hi: (magnitude >> 64) as u32,
            flags,
        })
    }

    /// Rebuild from the four wire words, rejecting reserved flag bits.
    pub fn from_parts(lo: u32, mid: u32, hi: u32, flags: u32) -> Result<Self> {
        let scale = (flags & SCALE_MASK) >> SCALE_SHIFT;
        if flags & !(SCALE_MASK | SIGN_MASK) != 0 || scale > MAX_SCALE {
            return Err(ProtocolError::DataIntegrity(format!(
                "invalid decimal flags {flags:#010x}"
            )));
        }
        Ok(Self {
            lo,
            mid,
            hi,
            flags,
        })
    }

    /// The four wire words in order `lo, mid, hi, flags`.
    pub fn parts(&self) -> [u32; 4] {
        [self.lo, self.mid, self.hi, self.flags]
    }

    pub fn mantissa(&self) -> i128 {
        let magnitude =
            (self.lo as i128) | ((self.mid as i128) << 32) | ((self.hi as i128) << 64);
        if self.is_negative() {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn scale(&self) -> u32 {
        (self.flags & SCALE_MASK) >> SCALE_SHIFT
    }

    pub fn is_negative(&self) -> bool {
        self.flags & SIGN_MASK != 0
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa().unsigned_abs().to_string();
        let scale = self.scale() as usize;
        let sign = if self.is_negative() { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}
