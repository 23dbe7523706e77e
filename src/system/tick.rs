//! Monotonic tick counter, advanced by the periodic timer interrupt.

use core::sync::atomic::{AtomicU32, Ordering};

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Advance the counter by one. Call exactly once per timer period.
#[inline]
pub fn sys_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot, wrapping at `u32::MAX`.
#[inline]
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Ticks elapsed since `since`, correct across one wrap of the counter.
#[inline]
pub fn elapsed(since: u32) -> u32 {
    ticks().wrapping_sub(since)
}
