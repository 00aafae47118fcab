//! The 128-bit per-record control word.
//!
//! Every record header embeds one control word: the lock half first, then
//! the version-stamp half, packaged together so one cache line covers both
//! the "may I touch this" and the "what version is this" questions. Two
//! flavors exist, differing only in the lock half:
//!
//! - [`ControlWord`]: exclusive queue lock + stamp. The default for tuple
//!   records, where only writers need the lock and readers go optimistic.
//! - [`RwControlWord`]: reader-writer queue lock + stamp. Used where
//!   readers must block out writers, e.g. row locks under 2PL.
//!
//! Only the stamp half is ever persisted (status bits masked off); lock
//! halves are reinitialized whenever a page is loaded into memory.

use crate::queue_lock::ExclusiveLock;
use crate::rw_lock::ReaderWriterLock;
use crate::stamp::{StampCell, VersionStamp};

// ============================================================================
//  ControlWord (exclusive variant)
// ============================================================================

/// Exclusive-lock control word: 8 bytes of lock, 8 bytes of stamp.
///
/// Born zero: fresh zeroed page memory is a valid unlocked, invalid-stamp
/// state, so [`Self::reset`] at page initialization is optional.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ControlWord {
    lock: ExclusiveLock,
    stamp: StampCell,
}

impl ControlWord {
    /// A fresh control word: unlocked, invalid stamp.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: ExclusiveLock::new(),
            stamp: StampCell::new(),
        }
    }

    /// The lock half.
    #[inline]
    #[must_use]
    pub fn lock(&self) -> &ExclusiveLock {
        &self.lock
    }

    /// The stamp half.
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> &StampCell {
        &self.stamp
    }

    /// Whether the record's lock is held (or a guest holds it).
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Whether the record is logically absent.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.stamp.load().is_deleted()
    }

    /// Whether the record has been relocated by a split.
    #[inline]
    #[must_use]
    pub fn is_moved(&self) -> bool {
        self.stamp.load().is_moved()
    }

    /// Whether the slot now points to a deeper index layer.
    #[inline]
    #[must_use]
    pub fn is_next_layer(&self) -> bool {
        self.stamp.load().is_next_layer()
    }

    /// Whether an exclusive holder is mid-mutation.
    #[inline]
    #[must_use]
    pub fn is_being_written(&self) -> bool {
        self.stamp.load().is_being_written()
    }

    /// `is_moved() || is_next_layer()`: the record's logical location has
    /// changed and cached addresses must be re-resolved.
    #[inline]
    #[must_use]
    pub fn needs_track_moved(&self) -> bool {
        self.stamp.load().needs_track_moved()
    }

    /// Zero both halves. Page initialization only.
    #[inline]
    pub fn reset(&self) {
        self.lock.reset();
        self.stamp.reset();
    }
}

// ============================================================================
//  RwControlWord (reader-writer variant)
// ============================================================================

/// Reader-writer control word: 8 bytes of lock, 8 bytes of stamp.
///
/// Not valid as all-zero (the lock's `next_writer` field would name thread
/// 0); pages must go through [`Self::new`] or [`Self::reset`].
#[derive(Debug, Default)]
#[repr(C)]
pub struct RwControlWord {
    lock: ReaderWriterLock,
    stamp: StampCell,
}

impl RwControlWord {
    /// A fresh control word: idle lock, invalid stamp.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: ReaderWriterLock::new(),
            stamp: StampCell::new(),
        }
    }

    /// The lock half.
    #[inline]
    #[must_use]
    pub fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    /// The stamp half.
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> &StampCell {
        &self.stamp
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.stamp.load().is_deleted()
    }

    #[inline]
    #[must_use]
    pub fn is_moved(&self) -> bool {
        self.stamp.load().is_moved()
    }

    #[inline]
    #[must_use]
    pub fn is_next_layer(&self) -> bool {
        self.stamp.load().is_next_layer()
    }

    #[inline]
    #[must_use]
    pub fn is_being_written(&self) -> bool {
        self.stamp.load().is_being_written()
    }

    #[inline]
    #[must_use]
    pub fn needs_track_moved(&self) -> bool {
        self.stamp.load().needs_track_moved()
    }

    /// Reinitialize both halves. Page initialization only.
    #[inline]
    pub fn reset(&self) {
        self.lock.reset();
        self.stamp.reset();
    }
}

/// Snapshot a stamp with status bits masked, the shape recovery writes to
/// disk as a little-endian 64-bit integer.
#[inline]
#[must_use]
pub fn persistable_stamp(stamp: VersionStamp) -> VersionStamp {
    let mut cleaned = stamp;
    cleaned.clear_status_bits();
    cleaned
}
