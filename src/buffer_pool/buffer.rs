//! Heap-allocated, fixed-size byte buffer (spec §4.4).
//!
//! Deliberately simple compared to the teacher's intrusive-linked-list
//! `Buffer` (`allocator/buffer.rs`): the pool here hands whole buffers to
//! callers rather than chaining them, so a boxed slice is sufficient and
//! avoids the teacher's `unsafe` layout bookkeeping.

use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};

/// A single pooled, zero-initialized buffer.
pub struct Buffer(Box<[u8]>);

impl Buffer {
    pub fn alloc(size: NonZeroUsize) -> Self {
        Self(vec![0u8; size.get()].into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
