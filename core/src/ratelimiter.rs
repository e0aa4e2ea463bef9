use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Token bucket pacing probe launches. Tokens refill on a background task and
/// never accumulate beyond one second's worth.
pub struct RateLimiter {
    sem: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl RateLimiter {
    /// Must be called from within a tokio runtime.
    pub fn new(tokens_per_sec: u32) -> Self {
        let burst = tokens_per_sec.max(1) as usize;
        let sem = Arc::new(Semaphore::new(burst));
        let sem_bg = sem.clone();
        let interval_ms = (1000u32 / tokens_per_sec.max(1)).max(1) as u64;
        let refill = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                if sem_bg.available_permits() < burst {
                    sem_bg.add_permits(1);
                }
            }
        });
        RateLimiter { sem, refill }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn burst_then_paced() {
        let rl = RateLimiter::new(20);
        let start = Instant::now();
        for _ in 0..20 {
            rl.acquire().await;
        }
        // the initial burst is immediate
        assert!(start.elapsed() < Duration::from_millis(500));
        rl.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
