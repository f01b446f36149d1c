//! Storage block: one allocation holding an atomic reference count, a
//! fixed length, and the element payload directly after the header.
//!
//! `BlockRef<T>` is a single counted co-ownership of a block. It carries
//! the linear token minted for it, so every `BlockRef` must end in
//! `release`; letting one drop silently panics.

use crate::tokens::{AtomicCount, Count, Token};
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};
use tracing::trace;

/// Failure to obtain storage for a new block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AllocError {
    /// The requested length does not fit in a valid allocation layout.
    CapacityOverflow,
    /// The allocator returned null for this layout.
    OutOfMemory(Layout),
}

impl AllocError {
    /// Report the failure through the global fatal path: allocator
    /// exhaustion goes to `handle_alloc_error`, overflow panics.
    #[cold]
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        match self {
            AllocError::CapacityOverflow => panic!("capacity overflow"),
            AllocError::OutOfMemory(layout) => alloc::handle_alloc_error(layout),
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::CapacityOverflow => f.write_str("array length overflows the address space"),
            AllocError::OutOfMemory(layout) => write!(
                f,
                "allocation of {} bytes (align {}) failed",
                layout.size(),
                layout.align()
            ),
        }
    }
}

impl std::error::Error for AllocError {}

/// Fixed fields at the start of every block.
#[repr(C)]
struct Header {
    refs: AtomicCount,
    len: usize,
}

/// A counted reference to one storage block.
pub struct BlockRef<T> {
    ptr: NonNull<Header>,
    token: Token<'static, AtomicCount>,
    _owns: PhantomData<T>,
}

impl<T> BlockRef<T> {
    /// Byte offset of the first element: the header padded up to `T`'s
    /// alignment.
    #[inline]
    fn offset() -> usize {
        let align = mem::align_of::<T>();
        (mem::size_of::<Header>() + align - 1) & !(align - 1)
    }

    /// Layout of a block holding `len` elements.
    fn layout(len: usize) -> Result<Layout, AllocError> {
        let elems = Layout::array::<T>(len).map_err(|_| AllocError::CapacityOverflow)?;
        let (layout, offset) = Layout::new::<Header>()
            .extend(elems)
            .map_err(|_| AllocError::CapacityOverflow)?;
        debug_assert_eq!(offset, Self::offset());
        Ok(layout.pad_to_align())
    }

    /// Allocate a block of `len` elements produced by `f(0)..f(len - 1)`.
    ///
    /// If `f` panics, the elements written so far are dropped and the
    /// allocation is freed before unwinding continues.
    pub fn try_new_with<F>(len: usize, mut f: F) -> Result<Self, AllocError>
    where
        F: FnMut(usize) -> T,
    {
        let layout = Self::layout(len)?;
        // Safety: the header makes the layout non-zero-sized.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw as *mut Header) else {
            return Err(AllocError::OutOfMemory(layout));
        };

        // Safety: the allocation is sized and aligned for the header plus
        // `len` elements starting at `offset`.
        let data = unsafe { raw.add(Self::offset()) as *mut T };
        let mut guard = PartialInit {
            raw,
            data,
            init: 0,
            layout,
        };
        while guard.init < len {
            let value = f(guard.init);
            // Safety: slot `init` is in bounds and not yet initialized.
            unsafe { ptr::write(data.add(guard.init), value) };
            guard.init += 1;
        }
        mem::forget(guard);

        // Safety: the header slot is properly aligned at the start of the allocation.
        unsafe {
            ptr::write(
                ptr.as_ptr(),
                Header {
                    refs: AtomicCount::new(0),
                    len,
                },
            );
        }
        // Safety: just initialized.
        let token = unsafe { ptr.as_ref() }.refs.get();
        trace!(len, "allocated array block");
        Ok(Self {
            ptr,
            token,
            _owns: PhantomData,
        })
    }

    /// Allocate a block of `len` default-constructed elements.
    pub fn try_new_default(len: usize) -> Result<Self, AllocError>
    where
        T: Default,
    {
        Self::try_new_with(len, |_| T::default())
    }

    /// Allocate a block holding clones of `src`.
    pub fn try_from_slice(src: &[T]) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        Self::try_new_with(src.len(), |i| src[i].clone())
    }

    fn header(&self) -> &Header {
        // Safety: a live BlockRef holds a token, so the block is not destroyed.
        unsafe { self.ptr.as_ref() }
    }

    fn data(&self) -> *mut T {
        // Safety: the element offset lies within the allocation.
        unsafe { (self.ptr.as_ptr() as *mut u8).add(Self::offset()) as *mut T }
    }

    /// Number of elements, fixed at allocation.
    #[inline]
    pub fn len(&self) -> usize {
        self.header().len
    }

    /// True for a zero-length block.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `BlockRef`s currently sharing this block.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.header().refs.load()
    }

    /// True if this is the only reference to the block.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.header().refs.is_unique()
    }

    /// Address of the first element; identifies the block.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    pub fn as_slice(&self) -> &[T] {
        // Safety: all `len` elements were initialized at allocation.
        unsafe { core::slice::from_raw_parts(self.data(), self.len()) }
    }

    /// Mutable view of the elements without checking the reference count.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other `BlockRef` to this block exists for
    /// the lifetime of the returned slice.
    #[track_caller]
    pub unsafe fn as_mut_slice_unchecked(&mut self) -> &mut [T] {
        debug_assert!(self.is_unique());
        unsafe { core::slice::from_raw_parts_mut(self.data(), self.len()) }
    }

    /// Take another counted reference to the same block.
    #[inline]
    pub fn share(&self) -> Self {
        Self {
            ptr: self.ptr,
            token: self.header().refs.get(),
            _owns: PhantomData,
        }
    }

    /// Give up this reference; the last one out destroys the block.
    pub fn release(self) {
        let BlockRef { ptr, token, .. } = self;
        // Safety: the token being returned kept the block alive until now.
        let header = unsafe { ptr.as_ref() };
        if header.refs.put(token) {
            // Safety: the count reached zero, so no other reference remains.
            unsafe { Self::destroy(ptr) };
        }
    }

    /// Drop every element in index order, then free the allocation.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, by the caller whose `put` observed zero.
    unsafe fn destroy(ptr: NonNull<Header>) {
        let len = unsafe { ptr.as_ref() }.len;
        let layout = Self::layout(len).expect("layout was valid at allocation");
        trace!(len, "destroying orphaned array block");
        let raw = ptr.as_ptr() as *mut u8;
        // Frees the allocation even if an element destructor panics.
        let _free = FreeOnDrop { raw, layout };
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
            let data = raw.add(Self::offset()) as *mut T;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data, len));
        }
    }
}

// Safety: a BlockRef hands out `&T` across threads and may drop `T` on
// whichever thread releases last.
unsafe impl<T: Send + Sync> Send for BlockRef<T> {}
unsafe impl<T: Send + Sync> Sync for BlockRef<T> {}

/// Cleanup for a block whose elements are still being constructed.
struct PartialInit<T> {
    raw: *mut u8,
    data: *mut T,
    init: usize,
    layout: Layout,
}

impl<T> Drop for PartialInit<T> {
    fn drop(&mut self) {
        let _free = FreeOnDrop {
            raw: self.raw,
            layout: self.layout,
        };
        // Safety: exactly the first `init` slots hold values.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.data, self.init)) };
    }
}

struct FreeOnDrop {
    raw: *mut u8,
    layout: Layout,
}

impl Drop for FreeOnDrop {
    fn drop(&mut self) {
        // Safety: `raw` came from `alloc::alloc(self.layout)`.
        unsafe { alloc::dealloc(self.raw, self.layout) };
    }
}
