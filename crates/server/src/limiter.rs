//! Per-IP token-bucket rate limiting.
//!
//! Each remote IP gets a bucket with capacity equal to the refill rate, so
//! a full second of quota can be spent in one burst. The bucket map sits
//! behind a single mutex; lookups are O(1).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by remote IP.
pub struct RateLimiter {
    /// Tokens per second, also the bucket capacity.
    rate: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Limiter admitting `rate` requests per second per IP.
    pub fn new(rate: u64) -> Self {
        RateLimiter {
            rate: rate as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request from `ip`.
    ///
    /// Refills by elapsed seconds times the rate, caps at capacity, then
    /// requires at least one whole token to consume.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip.to_string()).or_insert(Bucket {
            tokens: self.rate,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Number of tracked IPs.
    pub fn tracked_ips(&self) -> usize {
        self.buckets.lock().len()
    }
}
