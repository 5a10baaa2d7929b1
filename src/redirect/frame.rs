//! Call-local frame memory
//!
//! Small frames live inline (no heap traffic); larger ones spill. A frame
//! buffer must not move once its pointer has been handed out.

use smallvec::SmallVec;
use std::mem::size_of;

const WORD: usize = size_of::<u64>();

/// Zeroed, aligned scratch memory owned by one invocation
pub struct FrameBuffer {
    words: SmallVec<[u64; 16]>,
    len: usize,
    align: usize,
}

impl FrameBuffer {
    pub fn new(len: usize, align: usize) -> Self {
        let align = align.max(1);
        assert!(align.is_power_of_two(), "frame alignment must be a power of two");

        let padding = align.saturating_sub(WORD);
        let words = (len + padding + WORD - 1) / WORD;
        Self {
            words: SmallVec::from_elem(0, words),
            len,
            align,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the usable region, aligned as requested
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        let base = self.words.as_mut_ptr() as *mut u8;
        let addr = base as usize;
        let aligned = (addr + self.align - 1) & !(self.align - 1);
        base.wrapping_add(aligned - addr)
    }

    pub fn spilled(&self) -> bool {
        self.words.spilled()
    }
}
