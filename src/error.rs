use thiserror::Error;

/// Errors reported by the heap core. The public entry points stay in-band
/// (`None` / null pointers, see [`crate::Segfit`]), so this type mostly shows
/// up in [`crate::Segfit::init`] results and debug logs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The heap segment refused to grow. The heap remains consistent and
    /// every prior allocation is untouched.
    #[error("heap segment cannot grow by {requested} more bytes")]
    OutOfMemory {
        /// Number of bytes the extender asked the segment for.
        requested: usize,
    },

    /// `nmemb * size` overflowed in a zeroed allocation request.
    #[error("allocation count overflows: {nmemb} * {size}")]
    SizeOverflow {
        /// Element count of the rejected request.
        nmemb: usize,
        /// Element size of the rejected request.
        size: usize,
    },

    /// A thread panicked while holding the allocator lock, so the heap
    /// state can no longer be trusted.
    #[error("allocator lock poisoned by a panicked thread")]
    Poisoned,
}
