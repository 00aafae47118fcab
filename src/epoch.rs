//! Coarse-grained global time quanta.
//!
//! An [`Epoch`] is a 28-bit counter advanced periodically by the engine.
//! Transactions committing within the same epoch are ordered by their
//! in-epoch ordinal; across epochs, the epoch decides. The counter wraps,
//! so ordering uses a half-space comparison rather than plain integer
//! comparison: `a` is before `b` iff the cyclic distance from `a` to `b` is
//! less than half the ring. Zero is a distinguished invalid value outside
//! the cyclic order.

use std::fmt;

/// Number of significant bits in an epoch.
pub const EPOCH_BITS: u32 = 28;

/// Epoch values live in `0..EPOCH_OVERFLOW`; the overflow sentinel itself is
/// never a valid epoch.
pub const EPOCH_OVERFLOW: u32 = 1 << EPOCH_BITS;

/// The invalid (never-written) epoch.
pub const EPOCH_INVALID: u32 = 0;

/// Half of the ring; the horizon of the wrap-around comparison.
const HALF_SPACE: u32 = 1 << (EPOCH_BITS - 1);

/// A 28-bit wrap-aware epoch.
///
/// `Epoch` deliberately does not implement `PartialOrd`: integer order is
/// wrong once the counter wraps. Use [`Epoch::before`] instead.
///
/// # Example
///
/// ```rust
/// use tidlock::epoch::Epoch;
///
/// let a = Epoch::new(7);
/// let b = Epoch::new(8);
///
/// assert!(a.before(b));
/// assert!(!b.before(a));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Epoch(u32);

impl Epoch {
    /// Create an epoch from its integer value.
    ///
    /// Debug-asserts the value is within the 28-bit range.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < EPOCH_OVERFLOW, "epoch out of 28-bit range");
        Self(value)
    }

    /// The invalid epoch (zero).
    #[inline]
    #[must_use]
    pub const fn invalid() -> Self {
        Self(EPOCH_INVALID)
    }

    /// Get the integer value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// An epoch is valid iff it is nonzero.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != EPOCH_INVALID
    }

    /// The next epoch in cyclic order, skipping the invalid zero on wrap.
    #[inline]
    #[must_use]
    pub const fn one_more(self) -> Self {
        let next = (self.0 + 1) & (EPOCH_OVERFLOW - 1);
        if next == EPOCH_INVALID {
            Self(1)
        } else {
            Self(next)
        }
    }

    /// Wrap-aware strict order: `self` is before `other` iff the cyclic
    /// distance from `self` to `other` is within the half space.
    ///
    /// Both operands must be valid; equality is not "before".
    #[inline]
    #[must_use]
    pub fn before(self, other: Self) -> bool {
        debug_assert!(self.is_valid(), "before() on invalid epoch");
        debug_assert!(other.is_valid(), "before() with invalid operand");

        if self.0 == other.0 {
            return false;
        }
        other.0.wrapping_sub(self.0) & (EPOCH_OVERFLOW - 1) < HALF_SPACE
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Epoch({})", self.0)
        } else {
            write!(f, "Epoch(invalid)")
        }
    }
}
