// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Host-specific root sources: the global data segment's bounds, the
//! current stack extent, and three designated registers.
//!
//! Spec §6.2 treats these as an externally-supplied, fixed-contract
//! collaborator; this module is the concrete x86_64/Linux implementation
//! the rest of the collector is built against. A port to another ABI
//! re-implements this module and nothing else.

/// Inclusive/exclusive word-aligned bounds of the initialized/uninitialized
/// data segment, from the linker-defined symbols of the same name the
/// original C implementation used.
pub(crate) fn global_bounds() -> (usize, usize) {
    extern "C" {
        static __data_start: u8;
        static _end: u8;
    }
    unsafe {
        (
            &__data_start as *const u8 as usize,
            &_end as *const u8 as usize,
        )
    }
}

/// Current top of stack (the lowest address of the active frame chain).
#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub(crate) fn stack_pointer() -> usize {
    let sp: usize;
    unsafe {
        std::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}

/// Current value of `rbp`, the base of the immediate calling frame.
#[cfg(target_arch = "x86_64")]
#[inline(never)]
fn current_rbp() -> usize {
    let fp: usize;
    unsafe {
        std::arch::asm!("mov {}, rbp", out(reg) fp, options(nomem, nostack, preserves_flags));
    }
    fp
}

/// Upper bound of the calling thread's mapped stack, via
/// `pthread_getattr_np`/`pthread_attr_getstack` — used only to cap the
/// frame-chain walk below, so a broken or frame-pointer-omitted chain can
/// never dereference outside the actual stack mapping.
#[cfg(target_os = "linux")]
fn stack_ceiling() -> usize {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_attr_init(&mut attr) != 0 {
            return usize::MAX;
        }
        let ptid = libc::pthread_self();
        let e = libc::pthread_getattr_np(ptid, &mut attr);
        if e != 0 {
            libc::pthread_attr_destroy(&mut attr);
            return usize::MAX;
        }
        let mut stackaddr = std::ptr::null_mut();
        let mut stacksize: libc::size_t = 0;
        let got = libc::pthread_attr_getstack(&attr, &mut stackaddr, &mut stacksize);
        libc::pthread_attr_destroy(&mut attr);
        if got != 0 {
            return usize::MAX;
        }
        stackaddr as usize + stacksize
    }
}

/// The greatest address of the active frame chain (spec §6.2): walk the
/// saved-`rbp` linked list from the current frame outward to the outermost
/// still-active frame. This is what makes `[SP, FP)` cover every live
/// frame between the collector and the program's entry point, rather than
/// just the immediate caller's locals (too narrow) or the whole unused
/// stack mapping (too wide, and impractical for the dumper to print).
/// Requires frame pointers to be preserved
/// (`-C force-frame-pointers=yes`); without them this silently degrades to
/// just the immediate caller's frame.
#[cfg(target_os = "linux")]
pub(crate) fn frame_pointer() -> usize {
    let ceiling = stack_ceiling();
    let mut frame = current_rbp();
    if frame == 0 || frame >= ceiling {
        return ceiling;
    }
    loop {
        let saved = unsafe { *(frame as *const usize) };
        if saved <= frame || saved >= ceiling {
            return frame;
        }
        frame = saved;
    }
}

/// Three callee-saved general-purpose registers, read at the call site.
/// Stand-ins for the original's `getRBX`/`getRSI`/`getRDI`; callee-saved
/// registers are used here instead of the SysV argument registers (rsi,
/// rdi) since by the time a deep call chain reaches the collector those
/// have long since been overwritten, making them poor root candidates —
/// spec §6.2 explicitly leaves the exact register set to the port.
#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub(crate) fn reg1() -> usize {
    let v: usize;
    unsafe {
        std::arch::asm!("mov {}, rbx", out(reg) v, options(nomem, nostack, preserves_flags));
    }
    v
}

#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub(crate) fn reg2() -> usize {
    let v: usize;
    unsafe {
        std::arch::asm!("mov {}, r12", out(reg) v, options(nomem, nostack, preserves_flags));
    }
    v
}

#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub(crate) fn reg3() -> usize {
    let v: usize;
    unsafe {
        std::arch::asm!("mov {}, r13", out(reg) v, options(nomem, nostack, preserves_flags));
    }
    v
}

/// Stack and register bounds as they stand at the call site, snapshotted
/// together so a collection sees a single consistent view.
pub(crate) struct Registers {
    pub(crate) sp: usize,
    pub(crate) fp: usize,
    pub(crate) reg1: usize,
    pub(crate) reg2: usize,
    pub(crate) reg3: usize,
}

#[inline(never)]
pub(crate) fn capture() -> Registers {
    Registers {
        sp: stack_pointer(),
        fp: frame_pointer(),
        reg1: reg1(),
        reg2: reg2(),
        reg3: reg3(),
    }
}
