use std::{
    cmp,
    time::Duration,
};

use rand::Rng;

/// Exponential backoff with full jitter, capped at a maximum delay.
///
/// Mirrors the "reconnect within attempt/backoff limits" behavior a
/// WebSocket session needs: each failure doubles the base delay (capped),
/// and a fixed number of attempts exhausts the budget.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    /// The backoff the Kraken/Binance session core uses: 1s initial,
    /// doubling, capped at 30s, 10 attempts.
    pub fn session_default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 10)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Records a failure and returns how long to wait before the next
    /// attempt. Does not itself check `attempts_exhausted` — callers
    /// decide whether to keep retrying.
    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        let pow = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        let jitter = rng.random::<f32>();
        let backoff = self.initial.checked_mul(pow).unwrap_or(self.max);
        cmp::min(backoff, self.max).mul_f32(jitter.max(0.1))
    }
}
