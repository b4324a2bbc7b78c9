use std::{collections::HashMap, future::Future, sync::{Arc, Mutex}, time::Duration};

use tokio::task::JoinHandle;

/// Keyed one-shot delayed tasks. Scheduling under an existing key replaces
/// the pending task; keys can be cancelled before they fire.
#[derive(Clone, Default)]
pub struct NudgeQueue {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    jobs: HashMap<String, (u64, JoinHandle<()>)>,
}

impl NudgeQueue {
    pub fn schedule<F>(&self, key: &str, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        if let Some((_, old)) = inner.jobs.remove(key) {
            old.abort();
        }

        let slot = self.inner.clone();
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
            // Only clean up our own entry; a replacement may have landed.
            let mut inner = slot.lock().unwrap();
            if inner.jobs.get(&owned_key).map(|(g, _)| *g) == Some(generation) {
                inner.jobs.remove(&owned_key);
            }
        });
        inner.jobs.insert(key.to_string(), (generation, handle));
    }

    /// Returns whether a pending task was removed.
    pub fn cancel(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter_job(counter: Arc<AtomicU32>, amount: u32) -> impl Future<Output = ()> + Send {
        async move {
            counter.fetch_add(amount, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_delay() {
        let nudges = NudgeQueue::default();
        let fired = Arc::new(AtomicU32::new(0));

        nudges.schedule("k", Duration::from_secs(2), counter_job(fired.clone(), 1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(nudges.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_task() {
        let nudges = NudgeQueue::default();
        let fired = Arc::new(AtomicU32::new(0));

        nudges.schedule("k", Duration::from_secs(1), counter_job(fired.clone(), 1));
        nudges.schedule("k", Duration::from_secs(1), counter_job(fired.clone(), 10));
        assert_eq!(nudges.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let nudges = NudgeQueue::default();
        let fired = Arc::new(AtomicU32::new(0));

        nudges.schedule("k", Duration::from_secs(1), counter_job(fired.clone(), 1));
        assert!(nudges.cancel("k"));
        assert!(!nudges.cancel("k"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
