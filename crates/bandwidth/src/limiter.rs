use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Granularity of interruptible sleeps.
///
/// A stop signal arriving mid-sleep is observed within one chunk, keeping
/// shutdown latency well below the reconnect delay or a long throttle pause.
const SLEEP_CHUNK: Duration = Duration::from_millis(100);

/// Session-lifetime average bitrate limiter.
///
/// Before each send the session asks how long it must wait so that the total
/// bits sent, including the upcoming record, divided by the wall-clock time
/// since session start stays at or below the configured maximum.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    bits_per_second: NonZeroU64,
    started: Instant,
}

impl RateLimiter {
    /// Creates a limiter anchored at the current instant.
    #[must_use]
    pub fn new(bits_per_second: NonZeroU64) -> Self {
        Self {
            bits_per_second,
            started: Instant::now(),
        }
    }

    /// Returns the configured maximum rate.
    #[must_use]
    pub const fn bits_per_second(&self) -> NonZeroU64 {
        self.bits_per_second
    }

    /// Computes the pause required before sending the next record.
    ///
    /// `total_bytes_after_send` is the session total including the record
    /// about to be sent.
    #[must_use]
    pub fn required_delay(&self, total_bytes_after_send: u64) -> Duration {
        Self::delay_for(
            self.bits_per_second,
            total_bytes_after_send,
            self.started.elapsed(),
        )
    }

    /// Pure form of the pacing computation, used directly by tests.
    #[must_use]
    pub fn delay_for(
        bits_per_second: NonZeroU64,
        total_bytes_after_send: u64,
        elapsed: Duration,
    ) -> Duration {
        let bits = u128::from(total_bytes_after_send) * 8;
        let required_micros = bits * MICROS_PER_SECOND / u128::from(bits_per_second.get());
        let elapsed_micros = elapsed.as_micros();
        let deficit = required_micros.saturating_sub(elapsed_micros);
        duration_from_micros(deficit)
    }
}

fn duration_from_micros(micros: u128) -> Duration {
    let seconds = (micros / MICROS_PER_SECOND).min(u128::from(u64::MAX)) as u64;
    let sub_micros = (micros % MICROS_PER_SECOND) as u32;
    Duration::new(seconds, sub_micros * 1_000)
}

/// Sleeps for `duration` in small chunks, returning early when `stop` is set.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was interrupted.
pub fn interruptible_sleep(duration: Duration, stop: &AtomicBool) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let chunk = remaining.min(SLEEP_CHUNK);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(bits: u64) -> NonZeroU64 {
        NonZeroU64::new(bits).expect("nonzero")
    }

    #[test]
    fn no_delay_when_under_the_limit() {
        // 8000 bits/s = 1000 bytes/s; 500 bytes after 1 s is well under.
        let delay = RateLimiter::delay_for(rate(8_000), 500, Duration::from_secs(1));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn delay_restores_the_average() {
        // 1000 bytes at 8000 bits/s needs a full second; after half a second
        // the limiter asks for the other half.
        let delay = RateLimiter::delay_for(rate(8_000), 1_000, Duration::from_millis(500));
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[test]
    fn exact_pace_needs_no_delay() {
        let delay = RateLimiter::delay_for(rate(8_000), 1_000, Duration::from_secs(1));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn average_rate_never_exceeds_limit() {
        // Simulated session: sends of varying sizes, sleeping exactly what
        // the limiter asks. The implied average must stay at or below the
        // configured rate at every step.
        let limit = rate(1_000_000);
        let mut elapsed = Duration::ZERO;
        let mut total_bytes = 0u64;

        for len in [512u64, 4096, 128, 65536, 1, 8192] {
            total_bytes += len;
            let delay = RateLimiter::delay_for(limit, total_bytes, elapsed);
            elapsed += delay;
            // One microsecond of slack for integer truncation.
            let elapsed_micros = elapsed.as_micros().max(1);
            let avg_bits_per_second =
                u128::from(total_bytes) * 8 * 1_000_000 / elapsed_micros;
            assert!(
                avg_bits_per_second <= u128::from(limit.get()) + 8_000_000 / elapsed_micros,
                "average {avg_bits_per_second} exceeds limit after {total_bytes} bytes"
            );
        }
    }

    #[test]
    fn interruptible_sleep_runs_to_completion() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        assert!(interruptible_sleep(Duration::from_millis(30), &stop));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn interruptible_sleep_breaks_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!interruptible_sleep(Duration::from_secs(10), &stop));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
