//! refcounted-array: fixed-size arrays with copy-on-write sharing and
//! thread-safe reclamation of the shared storage.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: value semantics for arrays at O(1) copy cost. Cloning a handle
//!   bumps an atomic counter; element data is duplicated lazily, on the
//!   first write through a handle whose storage is shared.
//! - Layers:
//!   - `tokens::AtomicCount`: the counter. `get` mints a linear token,
//!     `put` returns one with a single decrement-and-test that reports the
//!     transition to zero.
//!   - `block::BlockRef<T>`: one allocation holding the header (count,
//!     length) followed by the elements, and a counted reference to it.
//!     Every `BlockRef` owns exactly one token; `release` hands it back
//!     and destroys the block when it was the last.
//!   - `RefCountedArray<T>`: public handle. Holds zero or one `BlockRef`,
//!     shares it on clone, releases it on drop, unshares it in `modify`.
//!
//! Constraints
//! - Length is fixed at creation; there is no growth.
//! - A block is destroyed exactly once, by the `put` that observes zero.
//! - A new block is fully built before an old one is released, so a
//!   failed allocation leaves the handle untouched.
//!
//! Threading
//! - Handles are `Send + Sync` when `T: Send + Sync`. Any number of
//!   threads may read, clone and drop handles to the same block.
//! - Mutating accessors take `&mut self`. A new co-owner can only be made
//!   by cloning through a shared borrow, so an `Acquire` load of 1 inside
//!   `modify` proves the block is exclusive for the duration of the write.
//!
//! Contract checks
//! - Accessing an invalid handle panics. Indexing is bounds-checked by the
//!   slice it goes through; `get_unchecked` skips the check.
//!
//! Overflow semantics
//! - Reference-count overflow aborts the process, matching `Arc`.

mod array;
#[cfg(not(feature = "bench_internal"))]
mod block;
#[cfg(feature = "bench_internal")]
pub mod block;
pub mod tokens;

// Public surface
pub use array::RefCountedArray;
pub use block::AllocError;
