//! # tidlock
//!
//! Transaction identity and lock substrate for a multi-core, in-memory OLTP
//! engine. Every record carries a 128-bit control word: a queue-lock half
//! that serializes writers, and a version-stamp half that carries the
//! record's persistent serialization position for optimistic concurrency
//! control and recovery.
//!
//! ## Design
//!
//! - Locks are queue (MCS) locks: the lock word stores only the queue tail,
//!   and each waiter spins on state local to its own pre-allocated node, so
//!   contended acquisition does not ping-pong the lock's cache line.
//! - Queue nodes are identified by `(ThreadId, BlockIndex)` rather than by
//!   address, resolved through a process-wide [`NodePool`]. This keeps lock
//!   words meaningful across address spaces sharing the memory.
//! - The version stamp is a plain 64-bit value: four status flags on top, a
//!   28-bit wrap-aware epoch, and an in-epoch ordinal. Serialization order
//!   compares `(epoch, ordinal)` only; the flags are masked out.
//!
//! ## Concurrency Model
//!
//! 1. Writers: acquire the record's queue lock, set `being_written`, mutate
//!    the payload, install the new stamp with one 64-bit release store,
//!    release the lock.
//! 2. Readers: either take the reader side of a [`ReaderWriterLock`], or
//!    read optimistically and validate the stamp afterwards.
//!
//! Grants are strictly FIFO. All waiting is by spin with CPU pause hints;
//! there are no suspension points, timeouts, or cancellation.
//!
//! ## Performance
//!
//! - Uncontended acquire/release: one atomic swap plus one CAS.
//! - Contended: waiters spin on their own cache line only.
//! - Control words are 16 bytes, so two records rarely share a line's lock
//!   traffic.

pub mod control_word;
pub mod epoch;
pub mod ordering;
pub mod pool;
pub mod queue_lock;
pub mod rw_lock;
pub mod scope;
pub mod stamp;

mod tracing_helpers;

pub use control_word::{ControlWord, RwControlWord};
pub use epoch::Epoch;
pub use pool::{BlockIndex, LockContext, NodePool, ThreadId};
pub use queue_lock::ExclusiveLock;
pub use rw_lock::ReaderWriterLock;
pub use scope::{LockScope, OwnerlessLockScope, RwLockScope};
pub use stamp::{StampCell, VersionStamp};
