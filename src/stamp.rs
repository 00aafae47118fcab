//! Record version stamps for optimistic concurrency control.
//!
//! A [`VersionStamp`] packs a record's persistent version into 64 bits:
//! four status flags on top, a 28-bit wrap-aware epoch, and the committing
//! transaction's in-epoch ordinal. It is the "what version is this record"
//! half of the control word; the lock half lives next to it (see
//! [`crate::control_word`]).
//!
//! # Layout
//! Bit 63: `deleted` | Bit 62: `moved` | Bit 61: `being_written` |
//! Bit 60: `next_layer` | Bits 32-59: `epoch` | Bits 0-31: `ordinal`
//!
//! Only the low 24 bits of the ordinal are meaningful; the top 8 must stay
//! zero so the ordinal can be packed elsewhere.
//!
//! # Ordering vs equality
//! Serialization order compares `(epoch, ordinal)` with the status flags
//! masked out — see [`VersionStamp::compare`]. `PartialEq` on the other hand
//! is raw bit equality, flags included. A raw 64-bit integer comparison is
//! never a correct serialization-order check.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use crate::epoch::{Epoch, EPOCH_OVERFLOW};
use crate::ordering::{STAMP_READ, STAMP_WRITE};

// ============================================================================
//  Bit Constants
// ============================================================================

/// Deleted bit: the record is logically absent.
pub const DELETED_BIT: u64 = 1 << 63;

/// Moved bit: the record has been relocated by an index split.
pub const MOVED_BIT: u64 = 1 << 62;

/// Being-written bit: an exclusive holder is mid-mutation.
pub const BEING_WRITTEN_BIT: u64 = 1 << 61;

/// Next-layer bit: the slot is an indirection to a deeper index layer.
pub const NEXT_LAYER_BIT: u64 = 1 << 60;

/// Mask selecting the serialization-order part (epoch + ordinal).
pub const SERIALIZER_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Mask selecting the epoch field.
pub const EPOCH_MASK: u64 = 0x0FFF_FFFF_0000_0000;

/// Mask selecting the ordinal field.
pub const ORDINAL_MASK: u64 = 0x0000_0000_FFFF_FFFF;

/// Maximum in-epoch ordinal. Four bytes are reserved, three are used.
pub const MAX_ORDINAL: u32 = (1 << 24) - 1;

// ============================================================================
//  VersionStamp
// ============================================================================

/// A record's 64-bit persistent version stamp.
///
/// Plain value type: copying and comparing are free; the atomic home of a
/// stamp inside a record header is [`StampCell`].
///
/// # Example
///
/// ```rust
/// use tidlock::stamp::VersionStamp;
/// use tidlock::epoch::Epoch;
///
/// let mut v = VersionStamp::new(Epoch::new(7), 100);
/// let w = VersionStamp::new(Epoch::new(7), 101);
///
/// assert!(v.before(w));
/// v.store_max(w);
/// assert_eq!(v, w);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionStamp(u64);

impl VersionStamp {
    /// The invalid (never-written) stamp: all zero.
    #[inline]
    #[must_use]
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Create a stamp from an epoch and ordinal, flags clear.
    ///
    /// Debug-asserts the epoch is in range and the ordinal within 24 bits.
    #[inline]
    #[must_use]
    pub fn new(epoch: Epoch, ordinal: u32) -> Self {
        debug_assert!(epoch.value() < EPOCH_OVERFLOW);
        debug_assert!(ordinal <= MAX_ORDINAL, "ordinal exceeds 24 bits");
        Self(u64::from(epoch.value()) << 32 | u64::from(ordinal))
    }

    /// Reconstruct a stamp from its raw 64-bit word.
    ///
    /// Used by recovery when reading stamps back from disk; persisted stamps
    /// have their status bits already masked off.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit word. Little-endian serialization of this value (with
    /// [`Self::clear_status_bits`] applied first) is the persisted shape.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    // ========================================================================
    //  Epoch / Ordinal
    // ========================================================================

    /// The stamp's epoch.
    #[inline]
    #[must_use]
    pub const fn epoch(self) -> Epoch {
        Epoch::new(self.epoch_int())
    }

    /// The epoch field as a plain integer.
    #[inline]
    #[must_use]
    pub const fn epoch_int(self) -> u32 {
        ((self.0 & EPOCH_MASK) >> 32) as u32
    }

    /// Overwrite the epoch, preserving ordinal and flags.
    #[inline]
    pub fn set_epoch(&mut self, epoch: Epoch) {
        debug_assert!(epoch.value() < EPOCH_OVERFLOW);
        self.0 = (self.0 & !EPOCH_MASK) | (u64::from(epoch.value()) << 32);
    }

    /// A stamp is valid iff its epoch is nonzero.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.epoch_int() != 0
    }

    /// The in-epoch ordinal.
    #[inline]
    #[must_use]
    pub fn ordinal(self) -> u32 {
        let ordinal = (self.0 & ORDINAL_MASK) as u32;
        debug_assert!(ordinal <= MAX_ORDINAL);
        ordinal
    }

    /// Overwrite the ordinal, preserving epoch and flags.
    ///
    /// Debug-asserts the value fits in 24 bits.
    #[inline]
    pub fn set_ordinal(&mut self, ordinal: u32) {
        debug_assert!(ordinal <= MAX_ORDINAL, "ordinal exceeds 24 bits");
        self.0 = (self.0 & !ORDINAL_MASK) | u64::from(ordinal);
    }

    /// Advance the ordinal by one.
    #[inline]
    pub fn increment_ordinal(&mut self) {
        let ordinal = self.ordinal();
        self.set_ordinal(ordinal + 1);
    }

    // ========================================================================
    //  Status Flags
    // ========================================================================

    /// Check the deleted flag.
    #[inline]
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        (self.0 & DELETED_BIT) != 0
    }

    /// Mark the record logically absent.
    #[inline]
    pub fn set_deleted(&mut self) {
        self.0 |= DELETED_BIT;
    }

    /// Clear the deleted flag (a re-insert over a deleted key).
    #[inline]
    pub fn set_not_deleted(&mut self) {
        self.0 &= !DELETED_BIT;
    }

    /// Check the moved flag.
    #[inline]
    #[must_use]
    pub const fn is_moved(self) -> bool {
        (self.0 & MOVED_BIT) != 0
    }

    /// Mark the record relocated. The transition is permanent.
    #[inline]
    pub fn set_moved(&mut self) {
        self.0 |= MOVED_BIT;
    }

    /// Check the being-written flag.
    #[inline]
    #[must_use]
    pub const fn is_being_written(self) -> bool {
        (self.0 & BEING_WRITTEN_BIT) != 0
    }

    /// Flag an in-progress mutation.
    #[inline]
    pub fn set_being_written(&mut self) {
        self.0 |= BEING_WRITTEN_BIT;
    }

    /// Clear the being-written flag after the payload settles.
    #[inline]
    pub fn set_write_complete(&mut self) {
        self.0 &= !BEING_WRITTEN_BIT;
    }

    /// Check the next-layer flag.
    #[inline]
    #[must_use]
    pub const fn is_next_layer(self) -> bool {
        (self.0 & NEXT_LAYER_BIT) != 0
    }

    /// Turn the slot into a next-layer pointer. The transition is permanent,
    /// and the deleted flag has no meaning for such a slot, so it is cleared
    /// in the same write.
    #[inline]
    pub fn set_next_layer(&mut self) {
        self.0 = (self.0 & !DELETED_BIT) | NEXT_LAYER_BIT;
    }

    /// `is_moved() || is_next_layer()`: observers must re-locate the record
    /// before trusting a cached address.
    #[inline]
    #[must_use]
    pub const fn needs_track_moved(self) -> bool {
        (self.0 & (MOVED_BIT | NEXT_LAYER_BIT)) != 0
    }

    /// Mask out the four status flags, preserving epoch and ordinal.
    #[inline]
    pub fn clear_status_bits(&mut self) {
        self.0 &= SERIALIZER_MASK;
    }

    // ========================================================================
    //  Serialization Order
    // ========================================================================

    /// Three-way comparison by `(epoch, ordinal)`, epoch compared under the
    /// wrap-around rule. Status flags are ignored.
    ///
    /// Both operands must be valid and carry nonzero ordinals; the commit
    /// protocol never compares anything else.
    #[inline]
    #[must_use]
    pub fn compare(self, other: Self) -> CmpOrdering {
        debug_assert!(self.is_valid(), "compare() on invalid stamp");
        debug_assert!(other.is_valid(), "compare() with invalid operand");
        debug_assert!(self.ordinal() != 0 && other.ordinal() != 0);

        if self.epoch_int() != other.epoch_int() {
            if self.epoch().before(other.epoch()) {
                return CmpOrdering::Less;
            }
            return CmpOrdering::Greater;
        }
        self.ordinal().cmp(&other.ordinal())
    }

    /// True iff `self` is before `other` in serialization order: either
    /// `self` is invalid (an unused slot is before everything), or strictly
    /// less under [`Self::compare`].
    ///
    /// `other` must be valid.
    #[inline]
    #[must_use]
    pub fn before(self, other: Self) -> bool {
        debug_assert!(other.is_valid(), "before() with invalid operand");

        if !self.is_valid() {
            return true;
        }
        if self.epoch_int() != other.epoch_int() {
            return self.epoch().before(other.epoch());
        }
        self.ordinal() < other.ordinal()
    }

    /// Advance `self` to `other` if `other` is later; like `max` under
    /// [`Self::before`]. Invalid `other` is ignored. Cannot distinguish two
    /// stamps differing only in status bits, which is fine for its one use:
    /// stamp generation at commit.
    #[inline]
    pub fn store_max(&mut self, other: Self) {
        if !other.is_valid() {
            return;
        }
        if self.before(other) {
            *self = other;
        }
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VersionStamp({}, ord={}{}{}{}{})",
            self.epoch(),
            self.ordinal(),
            if self.is_deleted() { ", deleted" } else { "" },
            if self.is_moved() { ", moved" } else { "" },
            if self.is_being_written() { ", writing" } else { "" },
            if self.is_next_layer() { ", next-layer" } else { "" },
        )
    }
}

// ============================================================================
//  StampCell
// ============================================================================

/// The atomic home of a [`VersionStamp`] inside a record header.
///
/// The stamp is mutated only by the record's current exclusive holder;
/// concurrent optimistic readers observe it through acquire loads and
/// validate after reading the payload. The publication protocol is:
///
/// 1. `begin_write()` — sets `being_written` so readers see the payload as
///    unstable, then fences before the payload mutation.
/// 2. payload writes.
/// 3. `install(stamp)` — one 64-bit release store of the new stamp with
///    `being_written` clear.
#[derive(Debug)]
pub struct StampCell {
    data: AtomicU64,
}

impl StampCell {
    /// A zeroed (invalid) cell. Control words are born zero.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: AtomicU64::new(0),
        }
    }

    /// A cell holding the given stamp.
    #[inline]
    #[must_use]
    pub const fn with_stamp(stamp: VersionStamp) -> Self {
        Self {
            data: AtomicU64::new(stamp.0),
        }
    }

    /// Snapshot the current stamp.
    #[inline]
    #[must_use]
    pub fn load(&self) -> VersionStamp {
        VersionStamp(self.data.load(STAMP_READ))
    }

    /// Publish a stamp. Release store; pairs with readers' acquire loads.
    #[inline]
    pub fn store(&self, stamp: VersionStamp) {
        self.data.store(stamp.0, STAMP_WRITE);
    }

    /// Flag an in-progress mutation before touching the payload.
    ///
    /// Release on the flag set, then an acquire fence so the payload writes
    /// cannot hoist above the flag becoming visible.
    #[inline]
    pub fn begin_write(&self) {
        self.data.fetch_or(BEING_WRITTEN_BIT, Ordering::Release);
        fence(Ordering::Acquire);
    }

    /// Install the committed stamp, clearing `being_written` in the same
    /// 64-bit store. The caller passes the stamp with the flag already
    /// clear; the single release store is what makes the payload visible.
    #[inline]
    pub fn install(&self, stamp: VersionStamp) {
        debug_assert!(!stamp.is_being_written(), "install with dirty flag");
        self.data.store(stamp.0, STAMP_WRITE);
    }

    /// Zero the cell. Page initialization only.
    #[inline]
    pub fn reset(&self) {
        self.data.store(0, Ordering::Relaxed);
    }
}

impl Default for StampCell {
    fn default() -> Self {
        Self::new()
    }
}
