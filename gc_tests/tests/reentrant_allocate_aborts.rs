// Run-time:
//  status: error

// A finalizer that itself calls `allocate` re-enters the allocator while its
// in-progress flag is still set. Spec §7 mandates this be fatal, not merely
// returning an error: the walk state the outer call left behind would
// otherwise silently corrupt the block chain. Checked out-of-process because
// the expected outcome is the whole process aborting.
//
// The in-progress flag is set only inside `allocate`, so reclamation has to
// be driven through `allocate`'s own miss-then-collect path (not a bare
// `collect()` call) for the finalizer's nested `allocate` call to actually
// be reentrant.

extern crate gcheap;

extern "C" fn naughty_finalizer(_payload: *mut u8) {
    gcheap::allocate(1, None);
}

#[inline(never)]
fn scrub_roots() {
    // Conservative scanning means `p`'s bit pattern must not still be
    // sitting in a register or a stale stack slot once it goes out of
    // scope below, or the dead block it names looks reachable by accident.
    #[cfg(target_arch = "x86_64")]
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

fn main() {
    gcheap::initialize(1 << 12);

    {
        let p = gcheap::allocate(2, Some(naughty_finalizer));
        assert!(!p.is_null());
        // `p` goes out of scope here with nothing else referencing it.
    }
    scrub_roots();

    // No free block can satisfy a request this large, so this call misses
    // on its first walk, invokes `collect()` while its own in-progress flag
    // is still held, and sweep reclaims the block allocated above —
    // `naughty_finalizer` then re-enters `allocate` while the flag reads
    // `InProgress`, which must abort the process.
    gcheap::allocate(1 << 20, None);

    unreachable!("reentrant allocate should have aborted the process");
}
