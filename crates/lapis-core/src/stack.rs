//! Stack headroom for the recursive parser and evaluator.
//!
//! Deeply nested source or deep Lapis recursion would otherwise exhaust the
//! host thread's stack before the call depth limit is reached. Recursive
//! entry points run through [`guarded`], which moves onto a heap-allocated
//! segment when the current one is nearly used up.

/// Remaining stack below which the next step switches segments.
const RED_ZONE: usize = 256 * 1024;

/// Size of each newly allocated segment.
const SEGMENT_SIZE: usize = 4 * 1024 * 1024;

pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}
