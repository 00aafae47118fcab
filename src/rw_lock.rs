//! Fair FIFO queue-based reader-writer lock.
//!
//! [`ReaderWriterLock`] is an 8-byte word implementing the queue-based
//! reader-writer protocol of Mellor-Crummey and Scott (PPoPP 1991), with
//! the Fraser correction for the reader-joins-granted-reader race. Grants
//! are strictly FIFO across cohorts: a contiguous run of readers executes
//! concurrently, a writer waits for every earlier grantee and blocks every
//! later one.
//!
//! # Word layout
//! Low 32 bits: queue tail `(thread << 16) | block`, 0 when no queue.
//! Next 16 bits: `next_writer` — a writer that yielded to an active reader
//! cohort and must be woken by the last reader out; `0xFFFF` when none.
//! High 16 bits: count of readers currently holding the lock.
//!
//! # Node discipline
//! Each waiter's node packs `{own class, blocked, successor class}` and the
//! successor `(thread, block)` pair into one 64-bit word. The co-location
//! is load-bearing: an arriving reader must atomically test "predecessor
//! still blocked AND no successor class claimed" and claim the reader slot
//! in a single compare-and-swap, and a linking successor must install its
//! identity with a single `fetch_or`. Splitting these fields reintroduces
//! the race the Fraser fix closed.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::ordering::{GRANT, GRANT_READ, LINK_PUBLISH, LINK_READ, TAIL_CAS, TAIL_CAS_FAILURE, TAIL_SWAP};
use crate::pool::{BlockIndex, LockContext, ThreadId, NO_THREAD};
use crate::queue_lock::{from_tail, to_tail};
use crate::tracing_helpers::trace_log;

// ============================================================================
//  Node word layout
// ============================================================================

/// Successor class: a reader has claimed the successor slot.
const SUCC_READER: u64 = 1;
/// Successor class: a writer has claimed the successor slot.
const SUCC_WRITER: u64 = 2;
/// Successor class: nobody linked yet. Both bits set, so a single
/// `fetch_and` turns it into either concrete class.
const SUCC_NONE: u64 = 3;
/// Mask of the successor-class field (bits 0-7).
const SUCC_CLASS_MASK: u64 = 0xFF;

/// Own class: this node waits for / holds a read grant.
const SELF_READER: u64 = 1 << 8;
/// Own class: this node waits for / holds a write grant.
const SELF_WRITER: u64 = 2 << 8;
/// Mask of the own-class bits.
const SELF_CLASS_MASK: u64 = 3 << 8;

/// Blocked bit: set while waiting, cleared by the granting party.
const BLOCKED_BIT: u64 = 1 << 15;

/// Successor thread id lives in bits 16-31.
const SUCC_THREAD_SHIFT: u32 = 16;
/// Successor block index lives in bits 32-47.
const SUCC_BLOCK_SHIFT: u32 = 32;

// ============================================================================
//  RwQueueNode
// ============================================================================

/// Pre-allocated reader-writer queue node: one atomic word holding the
/// combined self state and the successor identity.
#[derive(Debug)]
pub(crate) struct RwQueueNode {
    word: AtomicU64,
}

impl RwQueueNode {
    pub(crate) const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// Arm this node for a read acquisition: blocked, no successor.
    #[inline]
    pub(crate) fn init_reader(&self) {
        self.word
            .store(SELF_READER | BLOCKED_BIT | SUCC_NONE, Ordering::Release);
    }

    /// Arm this node for a write acquisition: blocked, no successor.
    #[inline]
    pub(crate) fn init_writer(&self) {
        self.word
            .store(SELF_WRITER | BLOCKED_BIT | SUCC_NONE, Ordering::Release);
    }

    /// Whether the owner of this node asked for a read grant. The class
    /// bits never change during an acquisition, so a relaxed read is enough.
    #[inline]
    pub(crate) fn is_reader(&self) -> bool {
        (self.word.load(Ordering::Relaxed) & SELF_CLASS_MASK) == SELF_READER
    }

    #[inline]
    pub(crate) fn is_blocked(&self) -> bool {
        (self.word.load(GRANT_READ) & BLOCKED_BIT) != 0
    }

    /// Grant the waiting owner by clearing its blocked bit.
    #[inline]
    pub(crate) fn unblock(&self) {
        debug_assert!(self.is_blocked(), "unblock of a granted node");
        self.word.fetch_and(!BLOCKED_BIT, GRANT);
    }

    /// Spin until granted.
    #[inline]
    pub(crate) fn wait_until_granted(&self) {
        while self.is_blocked() {
            std::hint::spin_loop();
        }
    }

    /// The one-CAS heart of the reader protocol: claim the successor slot
    /// as a reader *iff* the node's owner is still blocked and nobody has
    /// claimed the slot. Returns false if the owner was already granted.
    ///
    /// Must be a strong CAS: a spurious failure would misread a still
    /// blocked predecessor as granted and let a reader run beside a writer.
    #[inline]
    pub(crate) fn try_mark_reader_successor(&self) -> bool {
        // While the slot is unclaimed the successor fields are still zero,
        // so the whole expected word is just class + blocked + none.
        let own_class = self.word.load(Ordering::Relaxed) & SELF_CLASS_MASK;
        let expected = own_class | BLOCKED_BIT | SUCC_NONE;
        let desired = own_class | BLOCKED_BIT | SUCC_READER;
        self.word
            .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the successor slot as a writer. The slot must be unclaimed;
    /// clearing one bit turns `SUCC_NONE` (0b11) into `SUCC_WRITER` (0b10)
    /// without touching the rest of the word.
    #[inline]
    pub(crate) fn set_successor_class_writer(&self) {
        debug_assert!(self.successor_class() == SUCC_NONE);
        self.word.fetch_and(!(SUCC_NONE ^ SUCC_WRITER), GRANT);
    }

    /// Claim the successor slot as a reader without the blocked test.
    /// Only valid behind an already-granted writer, whose class field
    /// nobody else can touch. `SUCC_NONE` (0b11) becomes `SUCC_READER`
    /// (0b01) by clearing one bit.
    #[inline]
    pub(crate) fn set_successor_class_reader(&self) {
        debug_assert!(self.successor_class() == SUCC_NONE);
        debug_assert!(!self.is_reader());
        self.word.fetch_and(!(SUCC_NONE ^ SUCC_READER), GRANT);
    }

    /// Install the successor's identity. A single `fetch_or` suffices
    /// because the fields are zero until the successor writes them.
    #[inline]
    pub(crate) fn set_successor(&self, thread: ThreadId, block: BlockIndex) {
        debug_assert!(block != 0);
        debug_assert!(!self.successor_is_ready());
        let bits = (u64::from(block) << SUCC_BLOCK_SHIFT) | (u64::from(thread) << SUCC_THREAD_SHIFT);
        self.word.fetch_or(bits, LINK_PUBLISH);
    }

    /// Whether the successor has finished installing its identity.
    /// Checks the block index only - a thread id of 0 is legitimate.
    #[inline]
    pub(crate) fn successor_is_ready(&self) -> bool {
        (self.word.load(LINK_READ) >> SUCC_BLOCK_SHIFT) as BlockIndex != 0
    }

    /// The linked successor's identity.
    #[inline]
    pub(crate) fn successor(&self) -> (ThreadId, BlockIndex) {
        let word = self.word.load(LINK_READ);
        (
            (word >> SUCC_THREAD_SHIFT) as ThreadId,
            (word >> SUCC_BLOCK_SHIFT) as BlockIndex,
        )
    }

    #[inline]
    fn successor_class(&self) -> u64 {
        self.word.load(LINK_READ) & SUCC_CLASS_MASK
    }

    #[inline]
    pub(crate) fn has_reader_successor(&self) -> bool {
        self.successor_class() == SUCC_READER
    }

    #[inline]
    pub(crate) fn has_writer_successor(&self) -> bool {
        self.successor_class() == SUCC_WRITER
    }
}

// ============================================================================
//  ReaderWriterLock
// ============================================================================

/// An 8-byte fair queue-based reader-writer lock.
///
/// Reset state is tail 0, `next_writer` none, reader count 0. Unlike the
/// exclusive word, all-zero is *not* the idle state (`next_writer` zero
/// would name thread 0); pages must initialize the word through
/// [`Self::new`] or [`Self::reset`].
#[derive(Debug)]
#[repr(C)]
pub struct ReaderWriterLock {
    tail: AtomicU32,
    next_writer: AtomicU16,
    readers_count: AtomicU16,
}

impl ReaderWriterLock {
    /// A fresh, idle lock.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tail: AtomicU32::new(0),
            next_writer: AtomicU16::new(NO_THREAD),
            readers_count: AtomicU16::new(0),
        }
    }

    /// Whether any holder or waiter is enqueued.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.tail.load(Ordering::Relaxed) != 0
    }

    /// Number of readers currently holding the lock.
    #[inline]
    #[must_use]
    pub fn readers_count(&self) -> u16 {
        self.readers_count.load(Ordering::Relaxed)
    }

    /// Whether a writer has yielded to an active reader cohort and waits
    /// for the last reader out.
    #[inline]
    #[must_use]
    pub fn has_next_writer(&self) -> bool {
        self.next_writer.load(Ordering::Relaxed) != NO_THREAD
    }

    /// Reinitialize to idle. Page initialization only.
    #[inline]
    pub fn reset(&self) {
        self.tail.store(0, Ordering::Relaxed);
        self.next_writer.store(NO_THREAD, Ordering::Relaxed);
        self.readers_count.store(0, Ordering::Relaxed);
    }

    #[inline]
    fn increment_readers(&self) -> u16 {
        self.readers_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the count *before* the decrement; 1 means "last reader out".
    #[inline]
    fn decrement_readers(&self) -> u16 {
        let before = self.readers_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(before > 0, "reader count underflow");
        before
    }

    // ========================================================================
    //  Reader protocol
    // ========================================================================

    /// Take the lock for reading. FIFO behind any earlier writer; joins the
    /// running cohort when the predecessor is an already-granted reader.
    pub fn reader_acquire(&self, cx: &LockContext<'_>) -> BlockIndex {
        let block = cx.issue_block();
        let node = cx.my_rw_node(block);
        node.init_reader();

        let desired = to_tail(cx.thread_id(), block);
        let pred = self.tail.swap(desired, TAIL_SWAP);

        if pred == 0 {
            // Idle lock: first of a new cohort.
            self.increment_readers();
            node.unblock();
        } else {
            let (pred_thread, pred_block) = from_tail(pred);
            let pred_node = cx.rw_node_of(pred_thread, pred_block);

            if pred_node.try_mark_reader_successor() {
                // Predecessor still waiting (either class). It passes our
                // grant along once it is granted (reader) or releases
                // (writer).
                pred_node.set_successor(cx.thread_id(), block);
                node.wait_until_granted();
            } else if pred_node.is_reader() {
                // Already-granted reader: join its cohort immediately. Its
                // release cannot recycle the node under us - it spins for
                // our link before it proceeds.
                self.increment_readers();
                pred_node.set_successor(cx.thread_id(), block);
                node.unblock();
            } else {
                // Granted writer ahead. Class first, then identity; its
                // release reads them in the reverse order.
                pred_node.set_successor_class_reader();
                pred_node.set_successor(cx.thread_id(), block);
                node.wait_until_granted();
            }
        }

        // Grant propagation: a reader that chained behind us while we were
        // blocked starts now, with the count raised on its behalf before
        // its blocked bit drops.
        if node.has_reader_successor() {
            while !node.successor_is_ready() {
                std::hint::spin_loop();
            }
            self.increment_readers();
            let (succ_thread, succ_block) = node.successor();
            trace_log!(succ_thread, "reader grant propagated to cohort successor");
            cx.rw_node_of(succ_thread, succ_block).unblock();
        }

        block
    }

    /// Release a read grant.
    pub fn reader_release(&self, cx: &LockContext<'_>, block: BlockIndex) {
        debug_assert!(block != 0, "release with the null block");
        debug_assert!(
            block <= cx.current_block_of(cx.thread_id()),
            "release with a block this thread never issued"
        );
        let node = cx.my_rw_node(block);
        debug_assert!(node.is_reader(), "reader_release of a writer grant");
        let expected = to_tail(cx.thread_id(), block);

        // Resolve the successor before touching the count: a waiting writer
        // behind us must be registered before the last reader checks.
        if node.successor_is_ready()
            || self
                .tail
                .compare_exchange(expected, 0, TAIL_CAS, TAIL_CAS_FAILURE)
                .is_err()
        {
            while !node.successor_is_ready() {
                std::hint::spin_loop();
            }
            if node.has_writer_successor() {
                let (succ_thread, _) = node.successor();
                self.next_writer.swap(succ_thread, Ordering::SeqCst);
            }
        }

        if self.decrement_readers() == 1 {
            // Last reader out wakes the yielded writer, if any.
            let next = self.next_writer.load(Ordering::SeqCst);
            if next != NO_THREAD
                && self.readers_count.load(Ordering::SeqCst) == 0
                && self
                    .next_writer
                    .compare_exchange(next, NO_THREAD, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                // A thread waits on at most one queue lock at a time, so
                // its lane cursor names its waiting node.
                let writer_block = cx.current_block_of(next);
                let writer_node = cx.rw_node_of(next, writer_block);
                debug_assert!(!writer_node.is_reader());
                trace_log!(next, "last reader out waking yielded writer");
                writer_node.unblock();
            }
        }
    }

    // ========================================================================
    //  Writer protocol
    // ========================================================================

    /// Take the lock for writing. FIFO; yields to an active reader cohort
    /// by registering as `next_writer`.
    pub fn writer_acquire(&self, cx: &LockContext<'_>) -> BlockIndex {
        let block = cx.issue_block();
        let node = cx.my_rw_node(block);
        node.init_writer();

        let desired = to_tail(cx.thread_id(), block);
        let pred = self.tail.swap(desired, TAIL_SWAP);

        if pred == 0 {
            // Empty queue; either the lock is idle or a reader cohort is
            // draining. Register as the writer to wake, then try to claim
            // the registration back if no readers remain.
            debug_assert!(!self.has_next_writer());
            self.next_writer.swap(cx.thread_id(), Ordering::SeqCst);
            if self.readers_count.load(Ordering::SeqCst) == 0
                && self.next_writer.swap(NO_THREAD, Ordering::SeqCst) == cx.thread_id()
            {
                // Nobody raced us for the registration: granted.
                node.unblock();
            }
        } else {
            let (pred_thread, pred_block) = from_tail(pred);
            let pred_node = cx.rw_node_of(pred_thread, pred_block);
            pred_node.set_successor_class_writer();
            pred_node.set_successor(cx.thread_id(), block);
        }

        node.wait_until_granted();
        block
    }

    /// Release a write grant, handing off to whatever sits behind.
    pub fn writer_release(&self, cx: &LockContext<'_>, block: BlockIndex) {
        debug_assert!(block != 0, "release with the null block");
        debug_assert!(
            block <= cx.current_block_of(cx.thread_id()),
            "release with a block this thread never issued"
        );
        debug_assert!(self.readers_count() == 0, "writer held beside readers");

        let node = cx.my_rw_node(block);
        debug_assert!(!node.is_reader(), "writer_release of a reader grant");
        let expected = to_tail(cx.thread_id(), block);

        if !node.successor_is_ready()
            && self
                .tail
                .compare_exchange(expected, 0, TAIL_CAS, TAIL_CAS_FAILURE)
                .is_ok()
        {
            return;
        }

        while !node.successor_is_ready() {
            std::hint::spin_loop();
        }
        let (succ_thread, succ_block) = node.successor();
        let succ_node = cx.rw_node_of(succ_thread, succ_block);

        if node.has_reader_successor() {
            // Opening a new cohort: publish its count before the grant so
            // an observer never sees a granted reader with a zero count.
            self.increment_readers();
        }
        succ_node.unblock();
    }
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NodePool;

    #[test]
    fn test_lock_is_8_bytes() {
        assert_eq!(std::mem::size_of::<ReaderWriterLock>(), 8);
        assert_eq!(std::mem::size_of::<RwQueueNode>(), 8);
    }

    #[test]
    fn test_new_is_idle() {
        let lock = ReaderWriterLock::new();
        assert!(!lock.is_locked());
        assert_eq!(lock.readers_count(), 0);
        assert!(!lock.has_next_writer());
    }

    #[test]
    fn test_single_reader_roundtrip() {
        let pool = NodePool::new(2, 4);
        let cx = pool.context(0);
        let lock = ReaderWriterLock::new();

        let block = lock.reader_acquire(&cx);
        assert!(lock.is_locked());
        assert_eq!(lock.readers_count(), 1);

        lock.reader_release(&cx, block);
        assert!(!lock.is_locked());
        assert_eq!(lock.readers_count(), 0);
        assert!(!lock.has_next_writer());
    }

    #[test]
    fn test_single_writer_roundtrip() {
        let pool = NodePool::new(2, 4);
        let cx = pool.context(1);
        let lock = ReaderWriterLock::new();

        let block = lock.writer_acquire(&cx);
        assert!(lock.is_locked());
        assert_eq!(lock.readers_count(), 0);

        lock.writer_release(&cx, block);
        assert!(!lock.is_locked());
        assert!(!lock.has_next_writer());
    }

    #[test]
    fn test_interleaved_classes_single_thread() {
        let pool = NodePool::new(1, 8);
        let cx = pool.context(0);
        let lock = ReaderWriterLock::new();

        let r = lock.reader_acquire(&cx);
        lock.reader_release(&cx, r);
        let w = lock.writer_acquire(&cx);
        lock.writer_release(&cx, w);
        let r2 = lock.reader_acquire(&cx);
        lock.reader_release(&cx, r2);

        assert!(!lock.is_locked());
        assert_eq!(lock.readers_count(), 0);
    }

    #[test]
    fn test_reset_restores_idle() {
        let lock = ReaderWriterLock::new();
        lock.tail.store(7, Ordering::Relaxed);
        lock.next_writer.store(3, Ordering::Relaxed);
        lock.readers_count.store(2, Ordering::Relaxed);

        lock.reset();
        assert!(!lock.is_locked());
        assert_eq!(lock.readers_count(), 0);
        assert!(!lock.has_next_writer());
    }

    #[test]
    fn test_node_successor_claims() {
        let node = RwQueueNode::new();
        node.init_reader();
        assert!(node.is_reader());
        assert!(node.is_blocked());

        // Blocked with no successor: the reader CAS wins.
        assert!(node.try_mark_reader_successor());
        assert!(node.has_reader_successor());

        // Slot already claimed: second claim must fail.
        assert!(!node.try_mark_reader_successor());

        node.set_successor(4, 2);
        assert!(node.successor_is_ready());
        assert_eq!(node.successor(), (4, 2));
    }

    #[test]
    fn test_node_granted_defeats_reader_cas() {
        let node = RwQueueNode::new();
        node.init_reader();
        node.unblock();

        // Granted node: the combined CAS must fail.
        assert!(!node.try_mark_reader_successor());
        assert!(!node.has_reader_successor());
    }

    #[test]
    fn test_node_writer_claim() {
        let node = RwQueueNode::new();
        node.init_writer();
        assert!(!node.is_reader());

        node.set_successor_class_writer();
        assert!(node.has_writer_successor());
        assert!(!node.has_reader_successor());
    }
}
