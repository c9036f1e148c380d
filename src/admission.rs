use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

/// Per-client token bucket.
///
/// Tokens refill continuously at `rate` per second up to `burst`; one token
/// is spent per admitted request.
#[derive(Debug, Clone)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client rate limiting keyed by remote address.
///
/// Buckets are created lazily and reclaimed by [`RateLimiter::sweep`] once
/// they have refilled to burst, i.e. the client has been idle long enough
/// that dropping the bucket changes nothing.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, RateBucket>>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            rate_per_sec: f64::from(per_minute) / 60.0,
            burst: f64::from(burst),
        }
    }

    /// Admit or refuse one request from `client`.
    pub async fn check(&self, client: &str) -> bool {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let bucket = buckets.entry(client.to_string()).or_insert(RateBucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets whose effective token count has refilled to burst.
    pub async fn sweep(&self) {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens + elapsed * self.rate_per_sec < self.burst
        });
        let reclaimed = before - buckets.len();
        if reclaimed > 0 {
            log::debug!("rate limiter sweep reclaimed {} idle buckets", reclaimed);
        }
    }

    /// Spawn the periodic sweep for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        });
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}

/// Hard ceiling on simultaneously active sandboxes.
///
/// The permit is acquired before provisioning and travels with the sandbox;
/// it is released only after container removal, so the in-flight count never
/// under-counts live containers.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Non-blocking acquire. `None` means the service is at capacity and the
    /// request must be refused, never queued.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_refusal() {
        // Property: B+k back-to-back requests admit exactly B.
        let limiter = RateLimiter::new(60, 5);
        let mut admitted = 0;
        for _ in 0..8 {
            if limiter.check("10.0.0.1").await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(60, 1);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.2").await);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        // 6000/min = 100 tokens per second.
        let limiter = RateLimiter::new(6000, 1);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_idle_buckets() {
        let limiter = RateLimiter::new(6000, 1);
        assert!(limiter.check("idle").await);
        assert_eq!(limiter.bucket_count().await, 1);

        // Spent token refills within ~10ms at this rate; the bucket is then
        // indistinguishable from a fresh one and gets reclaimed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        limiter.sweep().await;
        assert_eq!(limiter.bucket_count().await, 0);

        // A drained bucket survives the sweep.
        let slow = RateLimiter::new(1, 1);
        assert!(slow.check("busy").await);
        slow.sweep().await;
        assert_eq!(slow.bucket_count().await, 1);
    }

    #[tokio::test]
    async fn test_gate_capacity() {
        // Property: with capacity C, exactly C acquires succeed.
        let gate = ConcurrencyGate::new(3);
        let p1 = gate.try_acquire().unwrap();
        let _p2 = gate.try_acquire().unwrap();
        let _p3 = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.available(), 0);

        drop(p1);
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire().is_some());
    }
}
