use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

const WINDOW: Duration = Duration::from_secs(1);
const POLL_BACKOFF: Duration = Duration::from_millis(50);

/// Outbound send limiter: a global sliding one-second window plus a minimum
/// interval per destination.
///
/// The check-and-record step is a single critical section; callers that are
/// not yet allowed sleep outside the lock and re-check, so waiting never
/// blocks other senders.
pub struct RateLimiter {
    global_rps: usize,
    per_chat_delay: Duration,
    inner: Mutex<Windows>,
}

#[derive(Default)]
struct Windows {
    global: VecDeque<Instant>,
    last_per_chat: HashMap<i64, Instant>,
}

impl RateLimiter {
    pub fn new(global_rps: usize, per_chat_delay: Duration) -> Self {
        Self {
            global_rps,
            per_chat_delay,
            inner: Mutex::new(Windows::default()),
        }
    }

    /// Wait until a send to `destination` satisfies both constraints, then
    /// record it under both trackers before returning.
    pub async fn acquire(&self, destination: i64) {
        loop {
            let sleep_for = {
                let mut windows = self.inner.lock().await;
                let now = Instant::now();

                while windows
                    .global
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > WINDOW)
                {
                    windows.global.pop_front();
                }

                let per_chat_wait = windows
                    .last_per_chat
                    .get(&destination)
                    .map(|last| self.per_chat_delay.saturating_sub(now.duration_since(*last)))
                    .unwrap_or(Duration::ZERO);
                let global_ok = windows.global.len() < self.global_rps;

                if per_chat_wait.is_zero() && global_ok {
                    windows.last_per_chat.insert(destination, now);
                    windows.global.push_back(now);
                    return;
                }

                if global_ok { per_chat_wait } else { POLL_BACKOFF }
            };
            tokio::time::sleep(sleep_for.max(POLL_BACKOFF)).await;
        }
    }
}
