// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A conservative, stop-the-world, mark-sweep garbage collector for a single
//! embedded heap arena.
//!
//! The process owns exactly one arena, created by [`initialize`]. From then
//! on [`allocate`] serves requests first-fit, invoking [`collect`] itself on
//! a miss; [`dump`] writes a diagnostic snapshot of roots and heap to
//! stderr. Everything else in this crate is support for those four
//! operations.
//!
//! ```no_run
//! gcheap::initialize(1 << 16);
//! let p = gcheap::allocate(4, None);
//! assert!(!p.is_null());
//! gcheap::collect();
//! ```

mod alloc;
mod arena;
mod config;
mod dump;
mod error;
mod gc;
mod probe;

pub use alloc::{allocate, Finalizer};
pub use arena::{initialize, try_initialize};
pub use config::{configure, GcConfig, ReentrancyPolicy};
pub use dump::dump;
pub use error::GcError;
pub use gc::collect;
