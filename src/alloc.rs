//! First-fit allocation with collector-on-miss (spec §4.2).

use crate::arena::{self, header, header_bytes, payload_ptr, WORD_BYTES};
use crate::config::{self, ReentrancyPolicy};
use crate::gc;
use parking_lot::Mutex;
use std::sync::OnceLock;

/// A client-supplied finalizer, invoked once on reclamation of the block it
/// was attached to. Spec §3: "opaque callable address, or null".
pub type Finalizer = extern "C" fn(*mut u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocState {
    Ready,
    InProgress,
}

fn state_cell() -> &'static Mutex<AllocState> {
    static STATE: OnceLock<Mutex<AllocState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(AllocState::Ready))
}

/// Resets the in-progress flag when it goes out of scope, including during
/// unwinding — so a reentrant call that panics (see `ReentrancyPolicy::Panic`)
/// still leaves the allocator ready for the next call, rather than wedging
/// it permanently in `InProgress`.
struct InProgressGuard;

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        *state_cell().lock() = AllocState::Ready;
    }
}

/// A finalizer re-entered `allocate`. Unrecoverable by design (spec §7): the
/// allocator's walk state would be corrupted by a nested first-fit search.
fn reentrant_abort() -> ! {
    eprintln!("gcheap: fatal: a finalizer called allocate() — reentrant allocation is not allowed");
    match config::current().reentrancy_policy {
        ReentrancyPolicy::Abort => std::process::abort(),
        ReentrancyPolicy::Panic => panic!("reentrant allocation from a finalizer"),
    }
}

/// Serve an allocation request of `words` words, optionally attaching
/// `finalizer`. Returns a word-aligned pointer to unzeroed payload on
/// success, or a null pointer if no fit exists even after a collection.
///
/// # Panics
/// Panics if `words` is zero — the arena has no zero-sized blocks to hand
/// out, and spec §4.2 requires `words >= 1` of the caller.
pub fn allocate(words: usize, finalizer: Option<Finalizer>) -> *mut u8 {
    assert!(words >= 1, "allocate: words must be at least 1");

    {
        let mut state = state_cell().lock();
        match *state {
            AllocState::Ready => *state = AllocState::InProgress,
            AllocState::InProgress => reentrant_abort(),
        }
    }
    let _reset = InProgressGuard;

    let heap = match arena::heap() {
        Some(h) => h,
        None => return std::ptr::null_mut(),
    };

    let request_bytes = words * WORD_BYTES;
    let total = header_bytes() + request_bytes;

    let mut collected_already = false;
    loop {
        let mut cursor = Some(heap.first());
        while let Some(block) = cursor {
            let (allocated, size) = unsafe { (header(block).allocated, header(block).size as usize) };
            // Strict-greater test: a block of exactly `total` bytes is
            // refused and left whole rather than split to zero remainder
            // (see DESIGN.md's Open Question decisions).
            if !allocated && size > total {
                unsafe { split(block, request_bytes, total, finalizer) };
                tracing::debug!(words, total_bytes = total, "allocate: served first fit");
                return payload_ptr(block);
            }
            cursor = heap.next(block);
        }

        if collected_already {
            tracing::warn!(words, "allocate: out of memory after collection");
            return std::ptr::null_mut();
        }
        gc::collect();
        collected_already = true;
    }
}

/// Split `block` (known free, `size > total`) into an allocated prefix of
/// `request_bytes` payload and a free remainder.
unsafe fn split(block: *mut u8, request_bytes: usize, total: usize, finalizer: Option<Finalizer>) {
    let old_size = header(block).size as usize;
    let remainder = old_size - total;
    let remainder_block = block.add(total);
    arena::write_header(remainder_block, arena::BlockHeader::free(remainder as u32));

    let finalizer_addr = finalizer.map(|f| f as usize).unwrap_or(0);
    arena::write_header(
        block,
        arena::BlockHeader::allocated(request_bytes as u32, finalizer_addr),
    );

    if config::current().zero_on_alloc {
        std::ptr::write_bytes(payload_ptr(block), 0, request_bytes);
    }
}
