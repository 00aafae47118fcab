//! FIFO queue-based exclusive lock.
//!
//! [`ExclusiveLock`] is an 8-byte word implementing an MCS-style mutex: the
//! word stores only the `(thread, block)` pair of the queue tail, and each
//! waiter spins on its own lane's wait flag, so contended acquisition does
//! not hammer the lock's cache line.
//!
//! # Protocol
//! 1. Acquire: issue a queue node, swap self into the tail. No predecessor
//!    means the lock is free and the caller is the head. Otherwise, publish
//!    self as the predecessor's successor and spin until the predecessor
//!    grants.
//! 2. Release: with no successor linked, a clean CAS of the tail from self
//!    back to zero finishes. A failed CAS means a successor is mid-link;
//!    wait for the link, then clear the successor's wait flag.
//!
//! # Ownerless (guest) mode
//! Short operations from contexts without a queue node (page-version bumps
//! during a split) hold the word by storing [`GUEST_ID`]. Guest and queued
//! holders are mutually exclusive: a guest enters only from a cleanly
//! unlocked word, and a queued acquirer that swaps the guest mark out hands
//! it straight back, adopting whatever tail the queue grew to meanwhile.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ordering::{LINK_PUBLISH, LINK_READ, TAIL_CAS, TAIL_CAS_FAILURE, TAIL_SWAP};
use crate::pool::{BlockIndex, LockContext, ThreadId};
use crate::tracing_helpers::trace_log;

/// Guest marker: the lock is held by a context that has no queue node.
pub const GUEST_ID: u32 = 0xFFFF_FFFF;

/// Pack a `(thread, block)` pair into a tail word. Block in the low half so
/// that "tail block is zero" and "word is zero" coincide for an idle lock.
#[inline]
#[must_use]
pub(crate) const fn to_tail(thread: ThreadId, block: BlockIndex) -> u32 {
    (thread as u32) << 16 | block as u32
}

/// Unpack a tail word.
#[inline]
#[must_use]
pub(crate) const fn from_tail(tail: u32) -> (ThreadId, BlockIndex) {
    ((tail >> 16) as ThreadId, tail as BlockIndex)
}

// ============================================================================
//  QueueNode
// ============================================================================

/// Pre-allocated exclusive-lock queue node.
///
/// Holds only the successor pair, packed into one word; `(_, 0)` means "no
/// successor yet". The waiter's own spin state lives on its lane's wait
/// flag, not in the node.
#[derive(Debug)]
pub(crate) struct QueueNode {
    successor: AtomicU32,
}

impl QueueNode {
    pub(crate) const fn new() -> Self {
        Self {
            successor: AtomicU32::new(0),
        }
    }

    /// Forget any stale successor before re-enqueueing this node.
    #[inline]
    pub(crate) fn clear_successor(&self) {
        self.successor.store(0, Ordering::Relaxed);
    }

    /// Publish `(thread, block)` as this node's successor.
    #[inline]
    pub(crate) fn set_successor(&self, thread: ThreadId, block: BlockIndex) {
        debug_assert!(block != 0);
        self.successor.store(to_tail(thread, block), LINK_PUBLISH);
    }

    /// The linked successor, if it has finished linking.
    #[inline]
    pub(crate) fn successor(&self) -> Option<(ThreadId, BlockIndex)> {
        let raw = self.successor.load(LINK_READ);
        let (thread, block) = from_tail(raw);
        if block == 0 {
            None
        } else {
            Some((thread, block))
        }
    }

    /// Whether a successor has linked itself behind this node.
    #[inline]
    pub(crate) fn has_successor(&self) -> bool {
        from_tail(self.successor.load(LINK_READ)).1 != 0
    }
}

// ============================================================================
//  ExclusiveLock
// ============================================================================

/// An 8-byte FIFO queue lock.
///
/// The low 32 bits hold the queue tail (or [`GUEST_ID`]); the high 32 bits
/// are reserved and always zero — recovery code reading raw pages depends
/// on that.
///
/// Control words are born zero; a zero word is unlocked with no waiters.
#[derive(Debug)]
#[repr(C)]
pub struct ExclusiveLock {
    tail: AtomicU32,
    _reserved: u32,
}

impl ExclusiveLock {
    /// A fresh, unlocked lock.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tail: AtomicU32::new(0),
            _reserved: 0,
        }
    }

    /// Whether any holder or waiter is present (guest included).
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.tail.load(Ordering::Relaxed) != 0
    }

    /// Thread id at the queue tail. Meaningless while unlocked or
    /// guest-held.
    #[inline]
    #[must_use]
    pub fn tail_thread(&self) -> ThreadId {
        from_tail(self.tail.load(Ordering::Relaxed)).0
    }

    /// Block index at the queue tail; 0 when unlocked.
    #[inline]
    #[must_use]
    pub fn tail_block(&self) -> BlockIndex {
        from_tail(self.tail.load(Ordering::Relaxed)).1
    }

    /// Zero the word. Page initialization only; never call on a live lock.
    #[inline]
    pub fn reset(&self) {
        self.tail.store(0, Ordering::Relaxed);
    }

    // ========================================================================
    //  Queued protocol
    // ========================================================================

    /// Take the lock, spinning FIFO behind any current holder.
    ///
    /// Returns the block index of the node installed for this grant; pass it
    /// back to [`Self::release`].
    pub fn acquire(&self, cx: &LockContext<'_>) -> BlockIndex {
        let block = cx.issue_block();
        let node = cx.my_node(block);
        node.clear_successor();
        cx.arm_wait();

        let desired = to_tail(cx.thread_id(), block);
        debug_assert!(desired != GUEST_ID);
        debug_assert!(desired != 0);

        // Normally our own entry; after handing a guest back it becomes the
        // tail of the queue segment that formed behind us.
        let mut group_tail = desired;
        let pred = loop {
            while self.tail.load(LINK_READ) == GUEST_ID {
                std::hint::spin_loop();
            }
            let pred = self.tail.swap(group_tail, TAIL_SWAP);
            debug_assert!(pred != group_tail);
            if pred != GUEST_ID {
                break pred;
            }
            // Swapped a guest out. Hand it back, adopting the current tail
            // as our group tail so waiters that enqueued meanwhile survive.
            trace_log!("exclusive acquire captured guest mark; handing back");
            group_tail = self.tail.swap(GUEST_ID, TAIL_SWAP);
            debug_assert!(group_tail != GUEST_ID);
            debug_assert!(group_tail != 0);
        };

        if pred == 0 {
            // Contention-free path.
            cx.disarm_wait();
            return block;
        }

        let (pred_thread, pred_block) = from_tail(pred);
        trace_log!(pred_thread, pred_block, "exclusive acquire enqueued");
        cx.node_of(pred_thread, pred_block)
            .set_successor(cx.thread_id(), block);
        cx.wait_until_granted();
        block
    }

    /// Race-free acquire for a lock no other thread can observe yet
    /// (freshly allocated page). No atomic read-modify-write involved.
    pub fn initial_acquire(&self, cx: &LockContext<'_>) -> BlockIndex {
        debug_assert!(!self.is_locked());
        let block = cx.issue_block();
        cx.my_node(block).clear_successor();
        self.tail
            .store(to_tail(cx.thread_id(), block), Ordering::Relaxed);
        block
    }

    /// Release a grant obtained from [`Self::acquire`] or
    /// [`Self::initial_acquire`].
    pub fn release(&self, cx: &LockContext<'_>, block: BlockIndex) {
        debug_assert!(block != 0, "release with the null block");
        debug_assert!(
            block <= cx.current_block_of(cx.thread_id()),
            "release with a block this thread never issued"
        );
        debug_assert!(self.is_locked());

        let node = cx.my_node(block);
        let expected = to_tail(cx.thread_id(), block);

        if !node.has_successor() {
            // Nobody visibly behind us: try to leave a clean word.
            if self
                .tail
                .compare_exchange(expected, 0, TAIL_CAS, TAIL_CAS_FAILURE)
                .is_ok()
            {
                return;
            }
        }

        // A successor swapped the tail but has not finished linking.
        let (succ_thread, _succ_block) = loop {
            if let Some(successor) = node.successor() {
                break successor;
            }
            std::hint::spin_loop();
        };
        cx.grant(succ_thread);
    }

    // ========================================================================
    //  Ownerless (guest) protocol
    // ========================================================================

    /// Take the lock without a queue node. Spins until the word is cleanly
    /// unlocked, then marks it guest-held.
    pub fn ownerless_acquire(&self) {
        loop {
            match self
                .tail
                .compare_exchange_weak(0, GUEST_ID, TAIL_CAS, TAIL_CAS_FAILURE)
            {
                Ok(_) => return,
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    /// Release a guest hold.
    ///
    /// CAS rather than a plain store: a queued acquirer may have briefly
    /// swapped the guest mark out and is about to hand it back.
    pub fn ownerless_release(&self) {
        loop {
            match self
                .tail
                .compare_exchange_weak(GUEST_ID, 0, TAIL_CAS, TAIL_CAS_FAILURE)
            {
                Ok(_) => return,
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    /// Race-free guest acquire for a lock no other thread can observe.
    pub fn ownerless_initial(&self) {
        debug_assert!(!self.is_locked());
        self.tail.store(GUEST_ID, Ordering::Relaxed);
    }
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(loom)))]
mod concurrent_tests;
