//! Lifetime-tied linear tokens and counting traits.
//!
//! Tokens are zero-sized proofs that a unit was acquired from a
//! particular counter instance. Dropping a token panics; the only valid
//! way to dispose of it is to return it to the originating counter via
//! `Count::put`.

use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicUsize, Ordering};

/// Zero-sized, linear token tied to its originating counter via lifetime.
pub struct Token<'a, C: ?Sized> {
    // Lifetime is tracked separately from the counter type to avoid
    // imposing `'a` bounds on `C` (useful for generic counters).
    _lt: PhantomData<&'a ()>,
    _ctr: PhantomData<*const C>,
}

impl<'a, C: ?Sized> Token<'a, C> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            _lt: PhantomData,
            _ctr: PhantomData,
        }
    }
}

impl<'a, C: ?Sized> Drop for Token<'a, C> {
    fn drop(&mut self) {
        // Intentional fail-fast on misuse: token must be consumed by Count::put.
        panic!("Token dropped without Count::put");
    }
}

/// A source of counted references, enforced by linear Token flow.
pub trait Count {
    /// The token type minted by this counter.
    type Token<'a>: Sized
    where
        Self: 'a;

    /// Acquire one counted reference and return a linear token for it.
    ///
    /// We mint tokens with a 'static lifetime parameter. The token itself is
    /// still branded to this counter via its type parameter, and can be
    /// covariantly shortened when returning it via `put`.
    fn get(&self) -> Self::Token<'static>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool;
}

/// Thread-safe reference counter for storage blocks.
///
/// `put` is a single decrement-and-test, so among any number of racing
/// callers exactly one observes the transition to zero.
#[derive(Debug)]
pub struct AtomicCount {
    count: AtomicUsize,
}

impl AtomicCount {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Current number of outstanding tokens.
    #[inline]
    pub fn load(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// True if exactly one token is outstanding.
    ///
    /// The load is `Acquire` so that every access made through tokens
    /// already returned by other threads happens-before the caller's
    /// subsequent writes.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.load() == 1
    }
}

impl Count for AtomicCount {
    type Token<'a>
        = Token<'a, Self>
    where
        Self: 'a;

    #[inline]
    fn get(&self) -> Self::Token<'static> {
        // Relaxed is enough: a new token can only be minted through an
        // existing one, which already keeps the count above zero.
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > isize::MAX as usize {
            // Follow Arc semantics: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        Token::<'static, Self>::new()
    }

    #[inline]
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool {
        let old = self.count.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "AtomicCount underflow");
        core::mem::forget(t);
        if old != 1 {
            return false;
        }
        // Synchronize with every Release decrement before the caller
        // tears down what the count was guarding.
        fence(Ordering::Acquire);
        true
    }
}
