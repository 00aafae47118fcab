//! Standard memory orderings for the lock protocols.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for the lock-word tail swap on acquire.
/// The swap both publishes the new tail and observes the predecessor.
pub const TAIL_SWAP: Ordering = Ordering::SeqCst;

/// Ordering for CAS success on the lock-word tail (clean release, guest entry).
pub const TAIL_CAS: Ordering = Ordering::SeqCst;

/// Ordering for CAS failure on the lock-word tail.
/// Only need to see the current value.
pub const TAIL_CAS_FAILURE: Ordering = Ordering::SeqCst;

/// Ordering for publishing a successor link into a predecessor's node.
/// Pairs with the predecessor's Acquire reads on release.
pub const LINK_PUBLISH: Ordering = Ordering::Release;

/// Ordering for reading successor links and node state while spinning.
/// Pairs with the successor's Release publication.
pub const LINK_READ: Ordering = Ordering::Acquire;

/// Ordering for granting (clearing a waiter's blocked state or wait flag).
/// Everything the releaser did must be visible to the grantee.
pub const GRANT: Ordering = Ordering::Release;

/// Ordering for a waiter observing its own grant.
pub const GRANT_READ: Ordering = Ordering::Acquire;

/// Ordering for reads within a held critical section.
/// Safe because the lock provides synchronization.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for stamp loads by optimistic readers.
/// Pairs with the writer's Release install.
pub const STAMP_READ: Ordering = Ordering::Acquire;

/// Ordering for stamp stores by the exclusive holder.
/// Must be visible to validating readers.
pub const STAMP_WRITE: Ordering = Ordering::Release;
