//! Heap consistency checker. A debug instrument, not a correctness
//! mechanism: production paths never call it, tests call it after every
//! operation. Any violation panics with a diagnostic naming the block and
//! the broken invariant.

use fixedbitset::FixedBitSet;
use tracing::trace;

use crate::{
    bins::{bin_index, BIN_COUNT},
    heap::Heap,
    segment::HeapSegment,
    tag::{DSIZE, MIN_BLOCK_SIZE, WSIZE},
};

impl<S: HeapSegment> Heap<S> {
    /// Walks the block sequence from prologue to epilogue and then every
    /// free list, verifying the structural invariants:
    ///
    /// - prologue and epilogue sentinels intact,
    /// - every block double word aligned, inside the segment, and at least
    ///   the minimum size,
    /// - every `prev_alloc` bit mirrors the allocation state of the
    ///   predecessor,
    /// - no two adjacent free blocks,
    /// - header and footer of every free block agree bit for bit,
    /// - every listed block is free, in range, in the bin its size
    ///   classifies into, and listed exactly once,
    /// - the free block count seen by the heap walk equals the count seen
    ///   by the list walk.
    ///
    /// `verbose` additionally logs one trace event per block, the heap-dump
    /// mode of the checker. No-op before initialization.
    pub fn check(&self, verbose: bool) {
        let Some(prologue) = self.prologue else {
            return;
        };
        let lo = self.segment.heap_lo() as usize;
        let hi = self.segment.heap_hi() as usize;

        unsafe {
            assert_eq!(prologue.size(), DSIZE, "prologue size corrupted");
            assert!(prologue.is_allocated(), "prologue lost its allocated bit");
            assert_eq!(
                prologue.header_word(),
                prologue.footer_word(),
                "prologue header and footer disagree"
            );

            // One bit per double word of heap span, set for every free
            // block's payload address seen by the heap walk.
            let span = (hi - lo) / DSIZE + 1;
            let mut free_payloads = FixedBitSet::with_capacity(span);
            let mut heap_free_count = 0usize;

            let mut prev_was_free = false;
            let mut prev_alloc_bit = true; // the prologue is allocated
            let mut block = prologue.next_in_heap();

            while block.size() != 0 {
                let addr = block.addr();
                let size = block.size();

                assert_eq!(addr % DSIZE, 0, "misaligned block at {addr:#x}");
                assert!(
                    addr > lo && addr - WSIZE + size <= hi + 1,
                    "block at {addr:#x} escapes the heap"
                );
                assert_eq!(size % DSIZE, 0, "odd size {size} at {addr:#x}");
                assert!(size >= MIN_BLOCK_SIZE, "undersized block at {addr:#x}");
                assert_eq!(
                    block.prev_allocated(),
                    prev_alloc_bit,
                    "stale prev_alloc bit at {addr:#x}"
                );

                if verbose {
                    trace!(addr, size, allocated = block.is_allocated(), "block");
                }

                if block.is_allocated() {
                    prev_was_free = false;
                } else {
                    assert!(!prev_was_free, "adjacent free blocks at {addr:#x}");
                    assert_eq!(
                        block.header_word(),
                        block.footer_word(),
                        "header and footer disagree at {addr:#x}"
                    );
                    prev_was_free = true;
                    heap_free_count += 1;
                    free_payloads.insert((addr - lo) / DSIZE);
                }

                prev_alloc_bit = block.is_allocated();
                block = block.next_in_heap();
            }

            // The loop stopped on the zero sized epilogue.
            assert!(block.is_allocated(), "epilogue lost its allocated bit");
            assert_eq!(
                block.prev_allocated(),
                prev_alloc_bit,
                "epilogue prev_alloc does not mirror the last block"
            );

            let mut listed_count = 0usize;
            let mut listed = FixedBitSet::with_capacity(span);

            for bin in 0..BIN_COUNT {
                let mut cursor = self.index.head(bin);
                while let Some(node) = cursor {
                    let addr = node.addr();
                    assert!(
                        addr > lo && addr < hi,
                        "listed block {addr:#x} lies outside the heap"
                    );
                    assert!(
                        !node.is_allocated(),
                        "allocated block {addr:#x} found in bin {bin}"
                    );
                    assert_eq!(
                        bin_index(node.size()),
                        bin,
                        "block {addr:#x} of size {} classified into bin {bin}",
                        node.size()
                    );

                    let payload_bit = (addr - lo) / DSIZE;
                    assert!(
                        free_payloads.contains(payload_bit),
                        "listed block {addr:#x} was not seen by the heap walk"
                    );
                    assert!(!listed.contains(payload_bit), "block {addr:#x} listed twice");
                    listed.insert(payload_bit);

                    listed_count += 1;
                    cursor = node.next_free();
                }
            }

            assert_eq!(
                heap_free_count, listed_count,
                "heap walk and list walk disagree on the free block count"
            );
        }
    }
}
