//! Error handling stance: fallible I/O-adjacent paths (backend calls,
//! reservation against an exhausted allocator) return `anyhow::Result`;
//! everything this crate considers an invariant violation — an out-of-range
//! tid, a partitioner that doesn't cover the space it was asked to, a
//! double-switch on the same `Data` — panics immediately rather than
//! returning an error a caller might be tempted to paper over. The
//! original made the same call (`laik_panic`/`assert` throughout `core.c`);
//! spec's "recovery is unsafe" note keeps it.

use anyhow::Result;

/// Narrow re-export so call sites can write `laik::error::Result<T>`
/// without importing `anyhow` directly.
pub type LaikResult<T> = Result<T>;
