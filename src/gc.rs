// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The collector: conservative mark, sweep (with finalizer dispatch), and
//! coalesce over the arena (spec §4.3). Invoked only by the allocator on a
//! first-fit miss; the allocator's own in-progress flag is what serializes
//! calls into this module, so there is no separate collector-state lock
//! here — the single-threaded contract (spec §5) makes a second lock
//! redundant.

use crate::alloc::Finalizer;
use crate::arena::{self, header, header_bytes, header_mut, Heap, WORD_BYTES};
use crate::config;
use crate::probe;

/// Run one full mark-sweep-coalesce cycle over the process-wide arena. A
/// no-op if the arena hasn't been initialized yet.
pub fn collect() {
    let heap = match arena::heap() {
        Some(h) => h,
        None => return,
    };

    let cfg = config::current();
    let span = tracing::info_span!("collect");
    let _enter = span.enter();

    if cfg.mark_phase {
        mark(heap);
    }
    if cfg.sweep_phase {
        sweep(heap);
    }
    if cfg.coalesce_phase {
        coalesce(heap);
    }
}

/// Scan every word in `[start, end)` as a candidate pointer (spec §4.3.1).
fn scan_and_mark(heap: &Heap, start: usize, end: usize, to_scan: &mut Vec<*mut u8>) {
    let mut addr = start;
    while addr + WORD_BYTES <= end {
        let word = unsafe { *(addr as *const usize) };
        try_mark(heap, word, to_scan);
        addr += WORD_BYTES;
    }
}

/// If `candidate` falls within some allocated block's payload, mark that
/// block (if not already marked) and queue its payload for scanning.
fn try_mark(heap: &Heap, candidate: usize, to_scan: &mut Vec<*mut u8>) {
    if let Some(block) = heap.find_allocated(candidate) {
        if !unsafe { header(block).marked } {
            unsafe { header_mut(block).marked = true };
            to_scan.push(block);
            tracing::trace!(?block, "mark: newly reachable");
        }
    }
}

fn mark(heap: &Heap) {
    let mut to_scan: Vec<*mut u8> = Vec::new();

    let (global_start, global_end) = probe::global_bounds();
    scan_and_mark(heap, global_start, global_end, &mut to_scan);

    let regs = probe::capture();
    let (stack_lo, stack_hi) = (regs.sp.min(regs.fp), regs.sp.max(regs.fp));
    scan_and_mark(heap, stack_lo, stack_hi, &mut to_scan);

    // Registers are candidate pointers themselves, not pointers into a
    // further range to scan (spec §4.3.1, root #3).
    try_mark(heap, regs.reg1, &mut to_scan);
    try_mark(heap, regs.reg2, &mut to_scan);
    try_mark(heap, regs.reg3, &mut to_scan);

    // Explicit work list rather than true recursion (spec §9 Design Notes):
    // bounds stack usage by block count, not object-graph depth.
    while let Some(block) = to_scan.pop() {
        let (start, end) = arena::payload_bounds(block);
        scan_and_mark(heap, start, end, &mut to_scan);
    }
}

fn sweep(heap: &Heap) {
    let mut cursor = Some(heap.first());
    while let Some(block) = cursor {
        let (allocated, marked, finalizer_addr) = unsafe {
            let h = header(block);
            (h.allocated, h.marked, h.finalizer)
        };

        if allocated && !marked {
            if finalizer_addr != 0 {
                let finalize: Finalizer = unsafe { std::mem::transmute(finalizer_addr) };
                let payload = arena::payload_ptr(block);
                tracing::debug!(?block, "sweep: invoking finalizer");
                finalize(payload);
            }
            unsafe { header_mut(block).allocated = false };
        }

        // Spec §4.3.2/§9: the original C never clears `marked` here, which
        // defeats reclamation of objects that become unreachable only after
        // a second collection. Clearing it unconditionally is the mandated
        // fix, and keeps `marked` the transient, outside-a-mark-phase-is-
        // always-zero bit the data model (spec §3) requires.
        unsafe { header_mut(block).marked = false };

        cursor = heap.next(block);
    }
}

fn coalesce(heap: &Heap) {
    let mut cursor = Some(heap.first());
    while let Some(block) = cursor {
        if !unsafe { header(block).allocated } {
            loop {
                let next = match heap.next(block) {
                    Some(n) => n,
                    None => break,
                };
                if unsafe { header(next).allocated } {
                    break;
                }
                let next_size = unsafe { header(next).size } as usize;
                unsafe { header_mut(block).size += (header_bytes() + next_size) as u32 };
            }
        }
        cursor = heap.next(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::allocate;
    use crate::arena::test_support;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Conservative scanning means a reclaimed pointer's bit pattern must
    /// not still be sitting in a register or a stale stack slot when
    /// `collect()` runs, or the block it names looks "reachable" by
    /// accident. Overwrite the three scanned registers and enough stack to
    /// displace the previous frame's locals before collecting — standard
    /// practice for testing a conservative collector.
    #[inline(never)]
    fn scrub_roots() {
        unsafe {
            std::arch::asm!(
                "xor rbx, rbx",
                "xor r12, r12",
                "xor r13, r13",
                out("rbx") _,
                out("r12") _,
                out("r13") _,
            );
        }
        let padding = [0usize; 256];
        std::hint::black_box(&padding);
    }

    #[test]
    fn marks_are_clear_outside_collection() {
        let _guard = test_support::TEST_LOCK.lock();
        let heap = test_support::ensure_initialized();
        collect();
        for block in heap.blocks() {
            assert!(!unsafe { header(block).marked });
        }
    }

    #[test]
    fn two_consecutive_collections_are_idempotent() {
        let _guard = test_support::TEST_LOCK.lock();
        let heap = test_support::ensure_initialized();
        let p = std::hint::black_box(allocate(4, None));
        assert!(!p.is_null());

        collect();
        let chain_after_first: Vec<(bool, u32)> = heap
            .blocks()
            .map(|b| unsafe { (header(b).allocated, header(b).size) })
            .collect();

        collect();
        let chain_after_second: Vec<(bool, u32)> = heap
            .blocks()
            .map(|b| unsafe { (header(b).allocated, header(b).size) })
            .collect();

        assert_eq!(chain_after_first, chain_after_second);
        std::hint::black_box(p);
    }

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn bump_finalized(_payload: *mut u8) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn finalizer_runs_exactly_once_on_reclamation() {
        let _guard = test_support::TEST_LOCK.lock();
        test_support::ensure_initialized();
        FINALIZED.store(0, Ordering::SeqCst);

        {
            let p = allocate(2, Some(bump_finalized));
            assert!(!p.is_null());
            // `p` goes out of scope here with nothing else referencing it.
        }

        scrub_roots();
        collect();
        collect();
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
    }
}
