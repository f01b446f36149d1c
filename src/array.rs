//! RefCountedArray: the user-facing handle over a shared storage block.

use crate::block::{AllocError, BlockRef};
use core::fmt;
use core::ops::{Index, IndexMut};
use tracing::trace;

/// A fixed-size array with copy-on-write sharing.
///
/// Cloning a handle only bumps the block's atomic reference count; element
/// data is duplicated the first time a shared handle is mutated. The last
/// handle to let go of a block destroys its elements and frees it, on
/// whichever thread that happens.
///
/// A handle is either *invalid* (no block; see [`RefCountedArray::invalid`])
/// or co-owns exactly one block. Every accessor other than
/// [`is_valid`](Self::is_valid) panics on an invalid handle.
pub struct RefCountedArray<T> {
    block: Option<BlockRef<T>>,
}

impl<T> RefCountedArray<T> {
    /// A handle that references no array. Distinct from a zero-length array.
    pub const fn invalid() -> Self {
        Self { block: None }
    }

    /// Create an array of `len` default values.
    pub fn new(len: usize) -> Self
    where
        T: Default,
    {
        Self::try_new(len).unwrap_or_else(|e| e.raise())
    }

    /// Like [`new`](Self::new), but reports allocation failure.
    pub fn try_new(len: usize) -> Result<Self, AllocError>
    where
        T: Default,
    {
        BlockRef::try_new_default(len).map(Self::from_block)
    }

    /// Create an array whose element `i` is `f(i)`.
    pub fn from_fn<F>(len: usize, f: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self::try_from_fn(len, f).unwrap_or_else(|e| e.raise())
    }

    /// Like [`from_fn`](Self::from_fn), but reports allocation failure.
    pub fn try_from_fn<F>(len: usize, f: F) -> Result<Self, AllocError>
    where
        F: FnMut(usize) -> T,
    {
        BlockRef::try_new_with(len, f).map(Self::from_block)
    }

    /// Create an array holding clones of `src`.
    pub fn from_slice(src: &[T]) -> Self
    where
        T: Clone,
    {
        Self::try_from_slice(src).unwrap_or_else(|e| e.raise())
    }

    /// Like [`from_slice`](Self::from_slice), but reports allocation failure.
    pub fn try_from_slice(src: &[T]) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        BlockRef::try_from_slice(src).map(Self::from_block)
    }

    fn from_block(block: BlockRef<T>) -> Self {
        Self { block: Some(block) }
    }

    #[inline]
    #[track_caller]
    fn block(&self) -> &BlockRef<T> {
        match &self.block {
            Some(b) => b,
            None => invalid_handle(),
        }
    }

    /// True if this handle references an array.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.block.is_some()
    }

    /// Number of elements; fixed for the lifetime of the array.
    #[inline]
    #[track_caller]
    pub fn len(&self) -> usize {
        self.block().len()
    }

    /// True for a zero-length array.
    #[inline]
    #[track_caller]
    pub fn is_empty(&self) -> bool {
        self.block().is_empty()
    }

    /// Number of handles sharing this handle's storage.
    #[track_caller]
    pub fn ref_count(&self) -> usize {
        self.block().ref_count()
    }

    /// Address of the first element. Changes only when the handle unshares.
    #[track_caller]
    pub fn as_ptr(&self) -> *const T {
        self.block().as_ptr()
    }

    /// True if both handles reference the same storage, or both are invalid.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (&a.block, &b.block) {
            (Some(x), Some(y)) => x.ptr_eq(y),
            (None, None) => true,
            _ => false,
        }
    }

    /// Read-only view of the elements. Never unshares.
    #[inline]
    #[track_caller]
    pub fn as_slice(&self) -> &[T] {
        self.block().as_slice()
    }

    /// Returns a reference to an element without bounds checking.
    ///
    /// # Safety
    ///
    /// `index` must be less than `self.len()`.
    #[track_caller]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        unsafe { self.as_slice().get_unchecked(index) }
    }

    /// Drop this handle's reference, leaving it invalid.
    fn release(&mut self) {
        if let Some(block) = self.block.take() {
            block.release();
        }
    }
}

impl<T: Clone> RefCountedArray<T> {
    /// Make this handle the sole owner of its storage.
    ///
    /// A no-op when the storage is not shared. Otherwise the elements are
    /// cloned into a fresh block, which this handle adopts before letting
    /// go of the old one.
    #[track_caller]
    pub fn modify(&mut self) {
        if let Err(e) = self.try_modify() {
            e.raise();
        }
    }

    /// Like [`modify`](Self::modify), but reports allocation failure.
    /// On error the handle still references its old storage.
    #[track_caller]
    pub fn try_modify(&mut self) -> Result<(), AllocError> {
        let old = self.block();
        // `&mut self` rules out a concurrent clone of this handle, so a
        // count of one cannot grow before the write below.
        if old.is_unique() {
            return Ok(());
        }
        let fresh = BlockRef::try_from_slice(old.as_slice())?;
        trace!(len = fresh.len(), "unshared array block");
        if let Some(old) = self.block.replace(fresh) {
            old.release();
        }
        Ok(())
    }

    /// Mutable view of the elements, unsharing first if needed.
    #[track_caller]
    pub fn make_mut(&mut self) -> &mut [T] {
        self.modify();
        match &mut self.block {
            // Safety: `modify` left this handle as the block's only owner,
            // and `&mut self` keeps it that way while the slice lives.
            Some(b) => unsafe { b.as_mut_slice_unchecked() },
            None => invalid_handle(),
        }
    }

    /// Store `value` at `index`, unsharing first if needed.
    ///
    /// Panics if `index` is out of bounds.
    #[track_caller]
    pub fn set(&mut self, index: usize, value: T) {
        self.make_mut()[index] = value;
    }
}

#[cold]
#[track_caller]
fn invalid_handle() -> ! {
    panic!("access through an invalid RefCountedArray")
}

impl<T> Default for RefCountedArray<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> Clone for RefCountedArray<T> {
    fn clone(&self) -> Self {
        Self {
            block: self.block.as_ref().map(BlockRef::share),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Assigning a handle that already shares our storage must not touch
        // the count; releasing first could destroy the source's block.
        if Self::ptr_eq(self, source) {
            return;
        }
        self.release();
        self.block = source.block.as_ref().map(BlockRef::share);
    }
}

impl<T> Drop for RefCountedArray<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Index<usize> for RefCountedArray<T> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: Clone> IndexMut<usize> for RefCountedArray<T> {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.make_mut()[index]
    }
}

impl<T: Clone> From<&[T]> for RefCountedArray<T> {
    fn from(src: &[T]) -> Self {
        Self::from_slice(src)
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCountedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block {
            Some(b) => f.debug_list().entries(b.as_slice()).finish(),
            None => f.write_str("RefCountedArray(invalid)"),
        }
    }
}

impl<T: PartialEq> PartialEq for RefCountedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.block, &other.block) {
            (Some(a), Some(b)) => a.as_slice() == b.as_slice(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Eq> Eq for RefCountedArray<T> {}
