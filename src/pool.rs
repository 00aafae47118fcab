//! Per-thread queue-node pools and the thread-local lock context.
//!
//! Queue locks identify waiters by `(ThreadId, BlockIndex)` instead of by
//! pointer: every worker thread owns a lane of pre-allocated nodes, and a
//! lock word names the node at its queue tail by that pair. The pool is the
//! process-wide resolve table that turns the pair back into a node, which
//! keeps lock words meaningful for sibling processes mapping the same
//! shared memory.
//!
//! A thread's lane also carries:
//! - the `waiting` flag the exclusive-lock protocol spins on (the releaser
//!   clears its successor's flag), and
//! - the block cursor: blocks are issued in order per acquisition and
//!   recycled wholesale between transactions via [`LockContext::reset_blocks`].
//!
//! The cursor doubles as the answer to "which node is thread T waiting on?"
//! for the reader-writer lock's `next_writer` wake, valid because a thread
//! waits on at most one queue lock at any instant.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use crate::queue_lock::QueueNode;
use crate::rw_lock::RwQueueNode;

/// Identifies a worker thread within the process. `0xFFFF` is reserved.
pub type ThreadId = u16;

/// Identifies a queue node within a thread's lane. `0` is the null sentinel;
/// valid blocks are `1..=capacity`.
pub type BlockIndex = u16;

/// Reserved thread id meaning "no thread" (e.g. no waiting writer).
pub const NO_THREAD: ThreadId = 0xFFFF;

// ============================================================================
//  Lane
// ============================================================================

/// One thread's pre-allocated queue nodes plus its spin flag and cursor.
struct Lane {
    /// Exclusive-lock nodes; index 0 is the sentinel and never issued.
    excl: Box<[QueueNode]>,

    /// Reader-writer nodes, same indexing.
    rw: Box<[RwQueueNode]>,

    /// True while the lane's owner waits on an exclusive lock.
    waiting: AtomicBool,

    /// Last issued block index; 0 when fresh.
    cursor: AtomicU16,
}

impl Lane {
    fn new(capacity: BlockIndex) -> Self {
        let slots = usize::from(capacity) + 1;
        Self {
            excl: (0..slots).map(|_| QueueNode::new()).collect(),
            rw: (0..slots).map(|_| RwQueueNode::new()).collect(),
            waiting: AtomicBool::new(false),
            cursor: AtomicU16::new(0),
        }
    }
}

// ============================================================================
//  NodePool
// ============================================================================

/// Process-wide pool of queue nodes, one lane per worker thread.
///
/// Sized once at engine startup. Locks embed `(thread, block)` pairs that
/// only this pool can resolve, so every lock user on the same memory must go
/// through the same pool.
pub struct NodePool {
    lanes: Box<[Lane]>,
    blocks_per_lane: BlockIndex,
}

impl NodePool {
    /// Pre-allocate `threads` lanes of `blocks_per_lane` nodes each.
    ///
    /// `blocks_per_lane` bounds how many locks one thread can hold or wait
    /// on within a single transaction.
    #[must_use]
    pub fn new(threads: usize, blocks_per_lane: BlockIndex) -> Self {
        debug_assert!(threads < usize::from(NO_THREAD), "thread id space exhausted");
        debug_assert!(blocks_per_lane > 0);
        debug_assert!(blocks_per_lane < BlockIndex::MAX);

        Self {
            lanes: (0..threads).map(|_| Lane::new(blocks_per_lane)).collect(),
            blocks_per_lane,
        }
    }

    /// Number of lanes (worker threads) in the pool.
    #[inline]
    #[must_use]
    pub fn threads(&self) -> usize {
        self.lanes.len()
    }

    /// Node capacity of each lane.
    #[inline]
    #[must_use]
    pub fn blocks_per_lane(&self) -> BlockIndex {
        self.blocks_per_lane
    }

    /// Hand out the lock context for `thread`.
    ///
    /// At most one live context per thread id; the pool does not police
    /// duplicates beyond debug assertions on cursor sanity.
    #[must_use]
    pub fn context(&self, thread: ThreadId) -> LockContext<'_> {
        debug_assert!(usize::from(thread) < self.lanes.len());
        LockContext { pool: self, id: thread }
    }

    #[inline]
    fn lane(&self, thread: ThreadId) -> &Lane {
        &self.lanes[usize::from(thread)]
    }
}

// ============================================================================
//  LockContext
// ============================================================================

/// A worker thread's handle into the pool: its identity, its lane, and the
/// resolve table for everyone else's nodes.
///
/// All lock acquire/release entry points take a `&LockContext`. The context
/// is deliberately not `Clone`: one per thread.
pub struct LockContext<'p> {
    pool: &'p NodePool,
    id: ThreadId,
}

impl std::fmt::Debug for LockContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext").field("id", &self.id).finish()
    }
}

impl<'p> LockContext<'p> {
    /// This context's thread id.
    #[inline]
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    /// The pool this context resolves against.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &'p NodePool {
        self.pool
    }

    /// Issue the next unused block index for an acquisition.
    ///
    /// Debug-asserts the lane has capacity left.
    #[inline]
    pub(crate) fn issue_block(&self) -> BlockIndex {
        let lane = self.pool.lane(self.id);
        // Owner is the only writer; Release pairs with cross-thread cursor
        // reads in `current_block_of`.
        let issued = lane.cursor.fetch_add(1, Ordering::Release) + 1;
        debug_assert!(issued <= self.pool.blocks_per_lane, "lane out of blocks");
        issued
    }

    /// Recycle all of this thread's blocks.
    ///
    /// Only legal while the thread holds and waits on no locks — between
    /// transactions.
    #[inline]
    pub fn reset_blocks(&self) {
        let lane = self.pool.lane(self.id);
        lane.cursor.store(0, Ordering::Relaxed);
    }

    /// The block `thread` most recently issued. Under the one-wait-at-a-time
    /// rule this is the node it is currently waiting on.
    #[inline]
    pub(crate) fn current_block_of(&self, thread: ThreadId) -> BlockIndex {
        self.pool.lane(thread).cursor.load(Ordering::Acquire)
    }

    // ========================================================================
    //  Node resolution
    // ========================================================================

    /// Resolve one of this thread's own exclusive nodes.
    #[inline]
    pub(crate) fn my_node(&self, block: BlockIndex) -> &'p QueueNode {
        self.node_of(self.id, block)
    }

    /// Resolve any thread's exclusive node.
    #[inline]
    pub(crate) fn node_of(&self, thread: ThreadId, block: BlockIndex) -> &'p QueueNode {
        debug_assert!(block != 0, "block 0 is the null sentinel");
        &self.pool.lane(thread).excl[usize::from(block)]
    }

    /// Resolve one of this thread's own reader-writer nodes.
    #[inline]
    pub(crate) fn my_rw_node(&self, block: BlockIndex) -> &'p RwQueueNode {
        self.rw_node_of(self.id, block)
    }

    /// Resolve any thread's reader-writer node.
    #[inline]
    pub(crate) fn rw_node_of(&self, thread: ThreadId, block: BlockIndex) -> &'p RwQueueNode {
        debug_assert!(block != 0, "block 0 is the null sentinel");
        &self.pool.lane(thread).rw[usize::from(block)]
    }

    // ========================================================================
    //  Exclusive-lock spin flag
    // ========================================================================

    /// Arm this thread's wait flag before enqueueing.
    #[inline]
    pub(crate) fn arm_wait(&self) {
        self.pool.lane(self.id).waiting.store(true, Ordering::Release);
    }

    /// Disarm the flag on the contention-free path.
    #[inline]
    pub(crate) fn disarm_wait(&self) {
        self.pool.lane(self.id).waiting.store(false, Ordering::Relaxed);
    }

    /// Spin until a predecessor grants the lock.
    #[inline]
    pub(crate) fn wait_until_granted(&self) {
        let lane = self.pool.lane(self.id);
        while lane.waiting.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Grant the lock to `thread` by clearing its wait flag.
    #[inline]
    pub(crate) fn grant(&self, thread: ThreadId) {
        self.pool.lane(thread).waiting.store(false, Ordering::Release);
    }
}
