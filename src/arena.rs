// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The heap arena: one contiguous byte range acquired once from the system
//! allocator, and the in-place chain of block headers threaded through it.

use crate::error::GcError;
use static_assertions::const_assert;
use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;
use std::sync::OnceLock;

pub(crate) const WORD_BYTES: usize = mem::size_of::<usize>();

/// The on-disk (well, in-arena) block header. A plain `repr(C)` aggregate —
/// deliberately *not* bit-packed, so `header_bytes()` can be derived from
/// `size_of` rather than hard-coded to a source-specific byte count.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) size: u32,
    pub(crate) allocated: bool,
    pub(crate) marked: bool,
    _padding: u16,
    /// Address of the finalizer, or 0. Only meaningful while `allocated`.
    pub(crate) finalizer: usize,
}

const_assert!(mem::align_of::<BlockHeader>() <= WORD_BYTES);

impl BlockHeader {
    pub(crate) fn free(size: u32) -> Self {
        BlockHeader {
            size,
            allocated: false,
            marked: false,
            _padding: 0,
            finalizer: 0,
        }
    }

    pub(crate) fn allocated(size: u32, finalizer: usize) -> Self {
        BlockHeader {
            size,
            allocated: true,
            marked: false,
            _padding: 0,
            finalizer,
        }
    }
}

fn round_up(n: usize, to: usize) -> usize {
    (n + to - 1) / to * to
}

/// Bytes occupied by one header, rounded up to a whole number of words so
/// that every block's payload starts word-aligned.
pub(crate) fn header_bytes() -> usize {
    round_up(mem::size_of::<BlockHeader>(), WORD_BYTES)
}

/// A block's address as it sits in the arena: points at the header, not the
/// payload. `NonNull` makes the "never null while the arena is alive"
/// invariant visible in the type.
pub(crate) type BlockPtr = NonNull<u8>;

pub(crate) struct Heap {
    base: BlockPtr,
    end: BlockPtr,
}

// The arena is only ever mutated while the allocator's in-progress flag is
// held, which this crate's single-threaded contract (spec.md §5) treats as
// sufficient synchronization; `OnceLock<Heap>` needs these to be placed in a
// `static` at all.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

static ARENA: OnceLock<Heap> = OnceLock::new();

impl Heap {
    /// Acquire `words * WORD_BYTES` bytes from the system allocator and
    /// install a single free block spanning the whole usable region.
    ///
    /// No side effects on any `Err`: an arena already exists, `words` can't
    /// even hold one header, or the system allocator failed.
    fn initialize(words: usize) -> Result<(), GcError> {
        if ARENA.get().is_some() {
            return Err(GcError::AlreadyInitialized);
        }

        let header_bytes = header_bytes();
        let total_bytes = match words.checked_mul(WORD_BYTES) {
            Some(b) if b > header_bytes => b,
            _ => return Err(GcError::HeaderTooLarge),
        };

        let layout = Layout::from_size_align(total_bytes, WORD_BYTES)
            .map_err(|_| GcError::HeaderTooLarge)?;

        let base =
            NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(GcError::HostAllocationFailed)?;
        let end = unsafe { NonNull::new_unchecked(base.as_ptr().add(total_bytes)) };

        unsafe {
            write_header(
                base.as_ptr(),
                BlockHeader::free((total_bytes - header_bytes) as u32),
            );
        }

        let heap = Heap { base, end };
        ARENA.set(heap).map_err(|_| GcError::AlreadyInitialized)
    }

    fn get() -> Option<&'static Heap> {
        ARENA.get()
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn end(&self) -> *mut u8 {
        self.end.as_ptr()
    }

    /// The first block in the chain. Present iff the arena has at least one
    /// byte, which `initialize` guarantees.
    pub(crate) fn first(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// The block immediately following `block`, or `None` at arena end.
    pub(crate) fn next(&self, block: *mut u8) -> Option<*mut u8> {
        let size = unsafe { (*(block as *const BlockHeader)).size } as usize;
        let next = unsafe { block.add(header_bytes() + size) };
        if next < self.end() {
            Some(next)
        } else {
            None
        }
    }

    /// Iterate every block header address in the chain, base to end.
    pub(crate) fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            heap: self,
            current: Some(self.first()),
        }
    }

    /// The allocated block whose payload contains `candidate`, if any.
    /// Linear in the block count, matching the original C's
    /// `GC_markIfPointerToAllocatedBlock`/`GC_isPointerToAllocatedBlock`
    /// scan — optimizing this is out of this crate's size budget.
    pub(crate) fn find_allocated(&self, candidate: usize) -> Option<*mut u8> {
        for block in self.blocks() {
            if unsafe { header(block).allocated } {
                let (start, end) = payload_bounds(block);
                if candidate >= start && candidate < end {
                    return Some(block);
                }
            }
        }
        None
    }
}

pub(crate) struct BlockIter<'a> {
    heap: &'a Heap,
    current: Option<*mut u8>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = *mut u8;

    fn next(&mut self) -> Option<*mut u8> {
        let block = self.current?;
        self.current = self.heap.next(block);
        Some(block)
    }
}

pub(crate) unsafe fn write_header(block: *mut u8, header: BlockHeader) {
    std::ptr::write(block as *mut BlockHeader, header);
}

/// Address of the first payload byte for the block whose header is at
/// `block`.
pub(crate) fn payload_ptr(block: *mut u8) -> *mut u8 {
    unsafe { block.add(header_bytes()) }
}

/// Initialize the process-wide arena. Idempotent-failing: a second call
/// always returns `false` without touching the existing arena (spec §6.1).
pub fn initialize(words: usize) -> bool {
    try_initialize(words).is_ok()
}

/// Like [`initialize`], but reports *why* initialization failed instead of
/// collapsing it to a boolean.
pub fn try_initialize(words: usize) -> Result<(), GcError> {
    let result = Heap::initialize(words);
    match &result {
        Ok(()) => tracing::info!(words, "heap arena initialized"),
        Err(e) => tracing::warn!(words, error = %e, "heap arena initialization failed"),
    }
    result
}

pub(crate) fn heap() -> Option<&'static Heap> {
    Heap::get()
}

/// Payload start/end addresses for the block whose header lives at `block`.
pub(crate) fn payload_bounds(block: *mut u8) -> (usize, usize) {
    let start = block as usize + header_bytes();
    let size = unsafe { (*(block as *const BlockHeader)).size } as usize;
    (start, start + size)
}

pub(crate) unsafe fn header<'a>(block: *mut u8) -> &'a BlockHeader {
    &*(block as *const BlockHeader)
}

pub(crate) unsafe fn header_mut<'a>(block: *mut u8) -> &'a mut BlockHeader {
    &mut *(block as *mut BlockHeader)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_is_word_aligned() {
        assert_eq!(header_bytes() % WORD_BYTES, 0);
        assert!(header_bytes() >= mem::size_of::<BlockHeader>());
    }

    #[test]
    fn fresh_arena_is_one_free_block() {
        let _guard = test_support::TEST_LOCK.lock();
        let heap = test_support::ensure_initialized();
        let first = heap.first();
        let h = unsafe { header(first) };
        assert!(!h.allocated);
        assert!(!h.marked);
        assert_eq!(heap.next(first), None);
    }

    #[test]
    fn double_initialize_fails() {
        let _guard = test_support::TEST_LOCK.lock();
        test_support::ensure_initialized();
        assert!(!initialize(test_support::TEST_ARENA_WORDS));
    }

    #[test]
    fn chain_integrity_and_coverage() {
        let _guard = test_support::TEST_LOCK.lock();
        let heap = test_support::ensure_initialized();
        let mut steps = 0usize;
        let mut covered = 0usize;
        let mut block = Some(heap.first());
        while let Some(b) = block {
            covered += header_bytes() + unsafe { header(b).size as usize };
            steps += 1;
            block = heap.next(b);
        }
        assert_eq!(covered, heap.end() as usize - heap.base() as usize);
        assert!(steps >= 1);
    }
}
