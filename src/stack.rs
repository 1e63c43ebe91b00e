//! Native stack headroom for the recursive evaluator.
//!
//! Every interpreter level costs several native frames, so reaching
//! `MAX_EVAL_DEPTH` can exhaust a small thread stack (2 MiB for spawned and
//! test threads) before the depth limit fires. Wrapping each
//! recursive step in [`ensure_sufficient_stack`] moves evaluation onto a
//! freshly allocated stack segment when the current one runs low, so the
//! depth limit is what ends runaway recursion on any thread.

/// Grow the stack when less than this remains (100 KiB red zone).
#[cfg(not(target_arch = "wasm32"))]
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment (1 MiB).
#[cfg(not(target_arch = "wasm32"))]
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first switching to a new stack segment if the current one is
/// nearly exhausted.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// WASM manages its own stack
#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
