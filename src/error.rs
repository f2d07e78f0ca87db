//! Error types for the non-fatal failure kinds in spec §7. The public API
//! (`initialize`/`allocate`) keeps its literal boolean/null contract; these
//! are exposed through the `try_*` wrappers and used internally to carry a
//! reason into the `tracing` logs before the boolean/null collapse happens.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GcError {
    #[error("heap arena already initialized")]
    AlreadyInitialized,

    #[error("requested word count cannot hold even a single block header")]
    HeaderTooLarge,

    #[error("system allocator failed to acquire the arena")]
    HostAllocationFailed,

    #[error("no free block large enough was found, even after a collection")]
    OutOfMemory,
}
