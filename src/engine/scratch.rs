//! Thread-local pool of reusable entity vectors.
//!
//! Filter evaluation runs on every refresh worker once per frame; letting
//! each intermediate set result allocate would turn the refresh pass into
//! an allocation storm. Buffers are acquired from a per-thread free list
//! and returned on drop, so early exits and panics cannot leak them. This
//! is the only mechanism for temporary set results.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use crate::engine::types::Entity;

thread_local! {
    static POOL: RefCell<Vec<Vec<Entity>>> = const { RefCell::new(Vec::new()) };
}

/// A pooled `Vec<Entity>`, returned to the thread-local pool on drop.
pub struct ScratchBuf {
    buf: Vec<Entity>,
}

impl ScratchBuf {
    /// Takes the underlying vector out of the pool's custody.
    ///
    /// The result is handed to long-lived owners (an observer snapshot);
    /// pair it with [`recycle`] when the displaced vector comes back.
    #[inline]
    pub fn into_vec(mut self) -> Vec<Entity> {
        std::mem::take(&mut self.buf)
    }
}

impl Deref for ScratchBuf {
    type Target = Vec<Entity>;

    #[inline]
    fn deref(&self) -> &Vec<Entity> {
        &self.buf
    }
}

impl DerefMut for ScratchBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.buf
    }
}

impl Drop for ScratchBuf {
    fn drop(&mut self) {
        if self.buf.capacity() == 0 {
            return;
        }
        self.buf.clear();
        let buf = std::mem::take(&mut self.buf);
        POOL.with(|pool| pool.borrow_mut().push(buf));
    }
}

/// Acquires an empty buffer from this thread's pool.
#[inline]
pub fn acquire() -> ScratchBuf {
    let buf = POOL.with(|pool| pool.borrow_mut().pop()).unwrap_or_default();
    ScratchBuf { buf }
}

/// Donates a vector (typically one displaced by a snapshot swap) to this
/// thread's pool.
#[inline]
pub fn recycle(mut vec: Vec<Entity>) {
    if vec.capacity() == 0 {
        return;
    }
    vec.clear();
    POOL.with(|pool| pool.borrow_mut().push(vec));
}
