use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window limiter: at most `max_operations` admissions in any
/// `window`-long interval.
///
/// Waiters are served in arrival order. The admission log sits behind a
/// tokio mutex, which queues lockers FIFO, and the caller at the head keeps
/// the lock while it sleeps for the next free slot.
/// Admission log entries allocated up front; larger limits grow on demand.
const PREALLOCATED_SLOTS: usize = 1024;

/// Stand-in deadline when `oldest + window` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug)]
pub struct RateLimiter {
    max_operations: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// # Panics
    /// Panics if `max_operations` is 0 or `window` is zero.
    pub fn new(max_operations: u32, window: Duration) -> Self {
        assert!(max_operations > 0, "max_operations must be > 0");
        assert!(!window.is_zero(), "window must be > 0");
        Self {
            max_operations: max_operations as usize,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(
                (max_operations as usize).min(PREALLOCATED_SLOTS),
            )),
        }
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until a slot is free and records the admission.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = admitted.front() {
                if now.duration_since(oldest) >= self.window {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            if admitted.len() < self.max_operations {
                admitted.push_back(now);
                return;
            }

            let Some(&oldest) = admitted.front() else {
                continue;
            };
            let wake_at = oldest
                .checked_add(self.window)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now);
            debug!(
                wait_ms = wake_at.saturating_duration_since(now).as_millis() as u64,
                "Rate limit reached, waiting for a slot"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Admissions still inside the current window.
    pub async fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().await;
        let now = Instant::now();
        admitted
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}
