// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A read-only, formatted snapshot of roots and heap (spec §4.4). Never
//! allocates or collects. Line formats mirror the original C
//! implementation's `dumpGlobalMemory`/`dumpStack`/`dumpRegisters`/
//! `dumpHeap` exactly, since spec §6.4 makes the per-line format an
//! external contract, not merely illustrative.

use crate::arena::{self, header, payload_ptr, Heap, WORD_BYTES};
use crate::probe;
use std::io::{self, Write};

const WORDS_PER_LINE: usize = 7;

fn marker(is_ptr: bool) -> &'static str {
    if is_ptr {
        "* "
    } else {
        "  "
    }
}

fn dump_globals<W: Write>(heap: &Heap, w: &mut W) -> io::Result<()> {
    let (start, end) = probe::global_bounds();
    let length_words = (end - start) / WORD_BYTES;
    writeln!(
        w,
        "Global Memory: start={:016x} end={:016x} length={} words",
        start, end, length_words
    )?;

    let mut addr = start;
    while addr + WORD_BYTES <= end {
        let value = unsafe { *(addr as *const usize) };
        let is_ptr = heap.find_allocated(value).is_some();
        writeln!(w, "{:016x} {:016x}{}", addr, value, if is_ptr { "*" } else { " " })?;
        addr += WORD_BYTES;
    }
    writeln!(w)
}

fn dump_stack<W: Write>(sp: usize, fp: usize, w: &mut W) -> io::Result<()> {
    writeln!(w, "Stack Memory\n")?;
    let mut addr = sp;
    while addr < fp {
        let value = unsafe { *(addr as *const usize) };
        writeln!(w, "[{:016x}]: {:016x}", addr, value)?;
        addr += WORD_BYTES;
    }
    writeln!(w)
}

fn dump_registers<W: Write>(heap: &Heap, regs: &probe::Registers, w: &mut W) -> io::Result<()> {
    writeln!(w, "Registers\n")?;
    writeln!(
        w,
        "reg1 {:016x}{}",
        regs.reg1,
        marker(heap.find_allocated(regs.reg1).is_some())
    )?;
    writeln!(
        w,
        "reg2 {:016x}{}",
        regs.reg2,
        marker(heap.find_allocated(regs.reg2).is_some())
    )?;
    writeln!(
        w,
        "reg3 {:016x}{}\n",
        regs.reg3,
        marker(heap.find_allocated(regs.reg3).is_some())
    )
}

fn dump_heap<W: Write>(heap: &Heap, w: &mut W) -> io::Result<()> {
    writeln!(w, "Heap")?;
    writeln!(w, "({} byte header)", arena::header_bytes())?;

    for block in heap.blocks() {
        let h = unsafe { header(block) };
        writeln!(
            w,
            "Block {} {} {} {:016x}",
            h.size as usize / WORD_BYTES,
            if h.allocated { "Allocated" } else { "Free" },
            if h.marked { "Marked" } else { "Unmarked" },
            if h.allocated { h.finalizer } else { 0 }
        )?;

        if h.allocated {
            let data = payload_ptr(block) as *const usize;
            let words = h.size as usize / WORD_BYTES;
            for i in 0..words {
                if i % WORDS_PER_LINE == 0 {
                    let addr = unsafe { data.add(i) } as usize;
                    write!(w, "{:016x} : ", addr)?;
                }
                let value = unsafe { *data.add(i) };
                write!(w, "{:016x}{}", value, marker(heap.find_allocated(value).is_some()))?;
                if (i + 1) % WORDS_PER_LINE == 0 || i + 1 == words {
                    writeln!(w)?;
                }
            }
        }
    }
    writeln!(w)
}

fn dump_to<W: Write>(w: &mut W) -> io::Result<()> {
    let heap = match arena::heap() {
        Some(h) => h,
        None => return Ok(()),
    };
    let regs = probe::capture();

    dump_globals(heap, w)?;
    dump_stack(regs.sp, regs.fp, w)?;
    dump_registers(heap, &regs, w)?;
    dump_heap(heap, w)
}

/// Write a full snapshot of roots and heap to the host's diagnostic stream
/// (stderr). Read-only: never allocates or collects.
pub fn dump() {
    let mut stderr = io::stderr();
    let _ = dump_to(&mut stderr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::allocate;
    use crate::arena::test_support;

    #[test]
    fn dump_output_has_all_four_sections() {
        let _guard = test_support::TEST_LOCK.lock();
        test_support::ensure_initialized();
        let p = allocate(3, None);
        assert!(!p.is_null());

        let mut buf = Vec::new();
        dump_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Global Memory:"));
        assert!(text.contains("Stack Memory"));
        assert!(text.contains("Registers"));
        assert!(text.contains("Heap"));
        assert!(text.contains("Allocated"));
        std::hint::black_box(p);
    }
}
