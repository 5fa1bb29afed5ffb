//! QPS pacing for sweep probes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};

/// Token bucket refilled by a background task. Clones share one budget, so a
/// single limiter can pace every worker in a sweep. The refill task exits on
/// its own once the last clone is gone.
#[derive(Clone)]
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
}

impl RateLimiter {
    /// Limiter releasing `permits_per_sec` tokens per second, spread evenly.
    /// Rates above 1000/s collapse to the 1 ms timer floor.
    pub fn new(permits_per_sec: u32) -> Self {
        let tokens = Arc::new(Semaphore::new(0));
        let refill = Arc::downgrade(&tokens);
        let gap = Duration::from_millis(u64::from((1000 / permits_per_sec.max(1)).max(1)));
        tokio::spawn(async move {
            let mut tick = interval(gap);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match refill.upgrade() {
                    Some(tokens) => tokens.add_permits(1),
                    None => break,
                }
            }
        });
        RateLimiter { tokens }
    }

    /// Wait for the next token and consume it.
    pub async fn acquire(&self) {
        if let Ok(token) = self.tokens.acquire().await {
            token.forget();
        }
    }
}
