//! Monotonic nanosecond clock shared by every threaded loop.

use std::sync::OnceLock;
use std::time::Instant;

/* a zero timestamp means "unset" throughout the pipeline, so the clock
 * starts well away from zero */
const CLOCK_BASE_NS: u64 = 10_000_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds on a monotonic process-local clock. Hosts stamping frames
/// with "now" should read this clock so direct-timestamp detection works.
pub fn now_ns() -> u64 {
    CLOCK_BASE_NS + epoch().elapsed().as_nanos() as u64
}

pub(crate) fn init() {
    let _ = epoch();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic_and_offset() {
        let a = now_ns();
        let b = now_ns();
        assert!(a >= CLOCK_BASE_NS);
        assert!(b >= a);
    }
}
