// src/fetchers/rate_limit.rs

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::shutdown::Shutdown;

/// Process-wide admission gate, one per platform, shared by every fetcher
/// of that platform across all wishlists.
///
/// Guarantees a minimum wall-clock spacing between the starts of any two
/// fetch attempts. Each caller reserves the earliest slot at least
/// `min_gap` after the previous reservation, records it while holding the
/// lock, then sleeps until its slot comes up. The lock is never held
/// while sleeping.
pub struct RateLimiter {
    min_gap: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            next_slot: Mutex::new(None),
        }
    }

    /// Block until the spacing constraint allows another attempt.
    /// Returns false, without admitting, if shutdown interrupts the wait.
    pub fn admit(&self, shutdown: &Shutdown) -> bool {
        let slot = {
            let mut next = self.next_slot.lock().unwrap();
            let now = Instant::now();
            let slot = match *next {
                Some(prev) if prev + self.min_gap > now => prev + self.min_gap,
                _ => now,
            };
            *next = Some(slot);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() && shutdown.sleep(wait) {
            return false;
        }
        !shutdown.is_triggered()
    }
}
