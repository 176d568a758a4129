//! Sliding-window request limiter for endpoints with an `rpm` budget

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Allows at most `max_requests` starts within any `window`
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter for a requests-per-minute budget
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            started: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request may start, then record it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut started = self.started.lock().await;
                let now = Instant::now();

                while let Some(&front) = started.front() {
                    if now.duration_since(front) >= self.window {
                        started.pop_front();
                    } else {
                        break;
                    }
                }

                if started.len() < self.max_requests {
                    started.push_back(now);
                    return;
                }

                // Full window: sleep until the oldest start ages out
                match started.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait + Duration::from_millis(1)).await;
        }
    }
}
