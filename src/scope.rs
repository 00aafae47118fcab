//! Scoped lock acquisition with guaranteed release.
//!
//! A scope owns at most one grant and releases it on every exit path,
//! including unwinding. Scopes are movable but not copyable; moving
//! transfers the held block to the new binding and Rust's move semantics
//! empty the donor. A deferred scope is armed against a lock but unheld
//! until [`LockScope::acquire`] engages it.
//!
//! [`LockScope::take_block`] transfers the raw grant out of the scope
//! without releasing, for wrappers that adopt the block under their own
//! lifetime (the page-version scope of the storage layer does this when a
//! split hands a locked page to its twin).
//!
//! # Panic Safety
//! Drop releases the grant even during unwinding, so a panic inside a
//! critical section never leaves the queue stuck.

use crate::pool::{BlockIndex, LockContext};
use crate::queue_lock::ExclusiveLock;
use crate::rw_lock::ReaderWriterLock;

// ============================================================================
//  LockScope (exclusive)
// ============================================================================

/// Scoped grant of an [`ExclusiveLock`].
#[derive(Debug)]
#[must_use = "dropping a scope immediately releases the lock"]
pub struct LockScope<'a> {
    cx: &'a LockContext<'a>,
    lock: &'a ExclusiveLock,
    /// Nonzero while the scope holds the lock.
    block: BlockIndex,
}

impl<'a> LockScope<'a> {
    /// Acquire `lock` now.
    pub fn new(cx: &'a LockContext<'a>, lock: &'a ExclusiveLock) -> Self {
        let block = lock.acquire(cx);
        Self { cx, lock, block }
    }

    /// Acquire `lock` through the race-free initial path. The caller
    /// asserts no other thread can observe the lock yet (page init).
    pub fn new_initial(cx: &'a LockContext<'a>, lock: &'a ExclusiveLock) -> Self {
        let block = lock.initial_acquire(cx);
        Self { cx, lock, block }
    }

    /// Arm a scope without acquiring; engage it later with
    /// [`Self::acquire`].
    pub fn deferred(cx: &'a LockContext<'a>, lock: &'a ExclusiveLock) -> Self {
        Self { cx, lock, block: 0 }
    }

    /// Whether the scope currently holds the lock.
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.block != 0
    }

    /// The held block index; 0 when unheld.
    #[inline]
    #[must_use]
    pub fn block(&self) -> BlockIndex {
        self.block
    }

    /// Engage a deferred scope.
    ///
    /// Debug-asserts the scope is not already held.
    pub fn acquire(&mut self) {
        debug_assert!(!self.is_held(), "scope acquired twice");
        self.block = self.lock.acquire(self.cx);
    }

    /// Engage a deferred scope through the race-free initial path.
    pub fn acquire_initial(&mut self) {
        debug_assert!(!self.is_held(), "scope acquired twice");
        self.block = self.lock.initial_acquire(self.cx);
    }

    /// Release now instead of at scope end. Does nothing if unheld.
    pub fn release(&mut self) {
        if self.block != 0 {
            self.lock.release(self.cx, self.block);
            self.block = 0;
        }
    }

    /// Transfer the grant out of the scope without releasing. The caller
    /// becomes responsible for the eventual [`ExclusiveLock::release`]
    /// with this block.
    #[must_use = "the caller now owns the release obligation"]
    pub fn take_block(&mut self) -> BlockIndex {
        let block = self.block;
        self.block = 0;
        block
    }
}

impl Drop for LockScope<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
//  RwLockScope
// ============================================================================

/// Scoped grant of a [`ReaderWriterLock`], in either class.
#[derive(Debug)]
#[must_use = "dropping a scope immediately releases the lock"]
pub struct RwLockScope<'a> {
    cx: &'a LockContext<'a>,
    lock: &'a ReaderWriterLock,
    as_reader: bool,
    block: BlockIndex,
}

impl<'a> RwLockScope<'a> {
    /// Acquire the read side now.
    pub fn read(cx: &'a LockContext<'a>, lock: &'a ReaderWriterLock) -> Self {
        let block = lock.reader_acquire(cx);
        Self { cx, lock, as_reader: true, block }
    }

    /// Acquire the write side now.
    pub fn write(cx: &'a LockContext<'a>, lock: &'a ReaderWriterLock) -> Self {
        let block = lock.writer_acquire(cx);
        Self { cx, lock, as_reader: false, block }
    }

    /// Arm an unheld read scope.
    pub fn deferred_read(cx: &'a LockContext<'a>, lock: &'a ReaderWriterLock) -> Self {
        Self { cx, lock, as_reader: true, block: 0 }
    }

    /// Arm an unheld write scope.
    pub fn deferred_write(cx: &'a LockContext<'a>, lock: &'a ReaderWriterLock) -> Self {
        Self { cx, lock, as_reader: false, block: 0 }
    }

    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.block != 0
    }

    /// Whether this scope takes (or holds) the read side.
    #[inline]
    #[must_use]
    pub fn is_reader(&self) -> bool {
        self.as_reader
    }

    #[inline]
    #[must_use]
    pub fn block(&self) -> BlockIndex {
        self.block
    }

    /// Engage a deferred scope with its armed class.
    pub fn acquire(&mut self) {
        debug_assert!(!self.is_held(), "scope acquired twice");
        self.block = if self.as_reader {
            self.lock.reader_acquire(self.cx)
        } else {
            self.lock.writer_acquire(self.cx)
        };
    }

    /// Release now instead of at scope end. Does nothing if unheld.
    pub fn release(&mut self) {
        if self.block != 0 {
            if self.as_reader {
                self.lock.reader_release(self.cx, self.block);
            } else {
                self.lock.writer_release(self.cx, self.block);
            }
            self.block = 0;
        }
    }

    /// Transfer the grant out; see [`LockScope::take_block`].
    #[must_use = "the caller now owns the release obligation"]
    pub fn take_block(&mut self) -> BlockIndex {
        let block = self.block;
        self.block = 0;
        block
    }
}

impl Drop for RwLockScope<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
//  OwnerlessLockScope
// ============================================================================

/// Scoped guest hold of an [`ExclusiveLock`] from a context that has no
/// queue node pool. Carries a held flag instead of a block index.
#[derive(Debug)]
#[must_use = "dropping a scope immediately releases the lock"]
pub struct OwnerlessLockScope<'a> {
    lock: &'a ExclusiveLock,
    locked_by_me: bool,
}

impl<'a> OwnerlessLockScope<'a> {
    /// Guest-acquire `lock` now.
    pub fn new(lock: &'a ExclusiveLock) -> Self {
        lock.ownerless_acquire();
        Self { lock, locked_by_me: true }
    }

    /// Guest-acquire through the race-free initial path.
    pub fn new_initial(lock: &'a ExclusiveLock) -> Self {
        lock.ownerless_initial();
        Self { lock, locked_by_me: true }
    }

    /// Arm without acquiring.
    pub fn deferred(lock: &'a ExclusiveLock) -> Self {
        Self { lock, locked_by_me: false }
    }

    #[inline]
    #[must_use]
    pub fn is_locked_by_me(&self) -> bool {
        self.locked_by_me
    }

    /// Engage a deferred scope.
    pub fn acquire(&mut self) {
        debug_assert!(!self.locked_by_me, "scope acquired twice");
        self.lock.ownerless_acquire();
        self.locked_by_me = true;
    }

    /// Release now instead of at scope end. Does nothing if unheld.
    pub fn release(&mut self) {
        if self.locked_by_me {
            self.lock.ownerless_release();
            self.locked_by_me = false;
        }
    }
}

impl Drop for OwnerlessLockScope<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NodePool;

    #[test]
    fn test_scope_releases_on_drop() {
        let pool = NodePool::new(1, 4);
        let cx = pool.context(0);
        let lock = ExclusiveLock::new();

        {
            let scope = LockScope::new(&cx, &lock);
            assert!(scope.is_held());
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_deferred_scope_engages_later() {
        let pool = NodePool::new(1, 4);
        let cx = pool.context(0);
        let lock = ExclusiveLock::new();

        let mut scope = LockScope::deferred(&cx, &lock);
        assert!(!scope.is_held());
        assert!(!lock.is_locked());

        scope.acquire();
        assert!(scope.is_held());
        assert!(lock.is_locked());

        scope.release();
        assert!(!lock.is_locked());

        // Release on an unheld scope is a no-op.
        scope.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_initial_scope() {
        let pool = NodePool::new(1, 4);
        let cx = pool.context(0);
        let lock = ExclusiveLock::new();

        let scope = LockScope::new_initial(&cx, &lock);
        assert!(scope.is_held());
        drop(scope);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_move_transfers_ownership() {
        let pool = NodePool::new(1, 4);
        let cx = pool.context(0);
        let lock = ExclusiveLock::new();

        let scope = LockScope::new(&cx, &lock);
        let moved = scope;
        assert!(moved.is_held());
        assert!(lock.is_locked());
        drop(moved);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_take_block_disarms_drop() {
        let pool = NodePool::new(1, 4);
        let cx = pool.context(0);
        let lock = ExclusiveLock::new();

        let mut scope = LockScope::new(&cx, &lock);
        let block = scope.take_block();
        assert!(!scope.is_held());
        drop(scope);

        // The lock is still held; the block owner must release it.
        assert!(lock.is_locked());
        lock.release(&cx, block);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_scope_releases_on_panic() {
        let pool = NodePool::new(1, 4);
        let lock = ExclusiveLock::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let cx = pool.context(0);
            let _scope = LockScope::new(&cx, &lock);
            panic!("intentional panic");
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_rw_scope_both_classes() {
        let pool = NodePool::new(1, 8);
        let cx = pool.context(0);
        let lock = ReaderWriterLock::new();

        {
            let scope = RwLockScope::read(&cx, &lock);
            assert!(scope.is_held());
            assert!(scope.is_reader());
            assert_eq!(lock.readers_count(), 1);
        }
        assert_eq!(lock.readers_count(), 0);

        {
            let scope = RwLockScope::write(&cx, &lock);
            assert!(scope.is_held());
            assert!(!scope.is_reader());
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_rw_deferred_scope() {
        let pool = NodePool::new(1, 8);
        let cx = pool.context(0);
        let lock = ReaderWriterLock::new();

        let mut scope = RwLockScope::deferred_write(&cx, &lock);
        assert!(!scope.is_held());
        scope.acquire();
        assert!(lock.is_locked());
        scope.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_ownerless_scope() {
        let lock = ExclusiveLock::new();

        {
            let scope = OwnerlessLockScope::new(&lock);
            assert!(scope.is_locked_by_me());
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());

        let mut scope = OwnerlessLockScope::deferred(&lock);
        assert!(!scope.is_locked_by_me());
        scope.acquire();
        assert!(lock.is_locked());
        scope.release();
        assert!(!lock.is_locked());
    }
}
