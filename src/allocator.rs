//! The public allocator surface.
//!
//! [`Segfit`] wraps the single threaded heap core in a [`Mutex`] and exposes
//! the four classic entry points plus explicit initialization and the debug
//! checker. It also implements [`GlobalAlloc`] for layouts the core can
//! honor, so it can serve as `#[global_allocator]`.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::Mutex,
};

use tracing::debug;

use crate::{
    error::HeapError,
    heap::{Heap, CHUNK},
    segment::{HeapSegment, Segment, DEFAULT_RESERVE},
    tag::DSIZE,
};

/// Allocator configuration. The defaults match the workload-tuned constants
/// the allocator was designed around; override them when embedding the
/// allocator into an environment with a known footprint.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Bytes of contiguous address space reserved for the heap segment.
    /// Pages are only touched as the heap actually grows.
    pub reserve: usize,
    /// Minimum heap extension step in bytes. Must be a positive multiple
    /// of 8.
    pub chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reserve: DEFAULT_RESERVE,
            chunk: CHUNK,
        }
    }
}

/// Segregated-fit allocator over one contiguous heap segment.
///
/// # Examples
///
/// ```
/// use segfit::Segfit;
///
/// let allocator = Segfit::with_default_config();
///
/// let ptr = allocator.alloc(100).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % 8, 0);
///
/// unsafe {
///     ptr.as_ptr().write_bytes(42, 100);
///     allocator.free(ptr.as_ptr());
/// }
/// ```
///
/// As the process-wide allocator:
///
/// ```no_run
/// use segfit::Segfit;
///
/// #[global_allocator]
/// static ALLOCATOR: Segfit = Segfit::with_default_config();
///
/// fn main() {
///     let nums = vec![1, 2, 3];
///     assert_eq!(nums.len(), 3);
/// }
/// ```
pub struct Segfit<S: HeapSegment = Segment> {
    heap: Mutex<Heap<S>>,
}

/// The mutex serializes every entry point, and the heap hands out disjoint
/// regions, so sharing the wrapper across threads is sound even though the
/// guarded state is full of raw pointers.
unsafe impl<S: HeapSegment> Sync for Segfit<S> {}

impl Segfit<Segment> {
    /// Builds an allocator with the default [`Config`]. `const`, so it can
    /// initialize a `static`.
    pub const fn with_default_config() -> Self {
        Self::with_config(Config {
            reserve: DEFAULT_RESERVE,
            chunk: CHUNK,
        })
    }

    /// Builds an allocator over a lazily reserved [`Segment`] of
    /// `config.reserve` bytes.
    pub const fn with_config(config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::new(Segment::new(config.reserve), config.chunk)),
        }
    }
}

impl Default for Segfit<Segment> {
    fn default() -> Self {
        Self::with_default_config()
    }
}

impl<S: HeapSegment> Segfit<S> {
    /// Wraps a custom heap segment, for hosts that provide their own
    /// contiguous range.
    pub const fn with_segment(segment: S, chunk: usize) -> Self {
        Self {
            heap: Mutex::new(Heap::new(segment, chunk)),
        }
    }

    /// Writes the heap skeleton and installs the first free block. Calling
    /// this is optional: every allocating entry point initializes a fresh
    /// heap on demand.
    pub fn init(&self) -> Result<(), HeapError> {
        let mut heap = self.heap.lock().map_err(|_| HeapError::Poisoned)?;
        if heap.is_initialized() {
            return Ok(());
        }
        heap.init()
    }

    /// Allocates `size` bytes and returns an 8-aligned pointer to them, or
    /// `None` when `size` is zero or the segment is exhausted. The bytes are
    /// owned by the caller until passed back to [`Self::free`].
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let mut heap = self.heap.lock().ok()?;

        match unsafe { heap.allocate(size) } {
            Ok(payload) => Some(payload),
            Err(err) => {
                debug!(size, %err, "allocation failed");
                None
            }
        }
    }

    /// Returns an allocation to the heap. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this allocator and not
    /// freed since. Anything else corrupts the heap; detection is the
    /// checker's job, not this function's.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        let Ok(mut heap) = self.heap.lock() else {
            return;
        };
        if !heap.is_initialized() && heap.init().is_err() {
            return;
        }

        heap.deallocate(payload);
    }

    /// Resizes an allocation. `size == 0` frees `ptr` and returns `None`; a
    /// null `ptr` behaves like [`Self::alloc`]. On failure the original
    /// allocation is untouched and stays valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`] for `ptr`.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.alloc(size);
        };

        if size == 0 {
            self.free(payload.as_ptr());
            return None;
        }

        let mut heap = self.heap.lock().ok()?;

        match heap.reallocate(payload, size) {
            Ok(new_payload) => Some(new_payload),
            Err(err) => {
                debug!(size, %err, "reallocation failed");
                None
            }
        }
    }

    /// Allocates `nmemb * size` zeroed bytes. Returns `None` when the
    /// product overflows, is zero, or the segment is exhausted.
    pub fn zalloc(&self, nmemb: usize, size: usize) -> Option<NonNull<u8>> {
        let Some(bytes) = nmemb.checked_mul(size) else {
            let err = HeapError::SizeOverflow { nmemb, size };
            debug!(%err, "zeroed allocation rejected");
            return None;
        };

        let payload = self.alloc(bytes)?;
        unsafe { payload.as_ptr().write_bytes(0, bytes) };

        Some(payload)
    }

    /// Runs the heap consistency checker. See [`Heap::check`].
    pub fn check(&self, verbose: bool) {
        if let Ok(heap) = self.heap.lock() {
            heap.check(verbose);
        }
    }
}

unsafe impl<S: HeapSegment> GlobalAlloc for Segfit<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // The heap only guarantees double word alignment; refusing stricter
        // layouts is an allocation failure, not undefined behaviour.
        if layout.align() > DSIZE {
            return ptr::null_mut();
        }

        Segfit::alloc(self, layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > DSIZE {
            return ptr::null_mut();
        }

        self.zalloc(1, layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > DSIZE {
            return ptr::null_mut();
        }

        Segfit::realloc(self, ptr, new_size).map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}
