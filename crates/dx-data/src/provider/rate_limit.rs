//! 아웃바운드 요청 rate limiter.
//!
//! Token Bucket 알고리즘. 제공자 클라이언트마다 하나씩 소유하므로
//! 한 제공자의 대기가 다른 제공자에 영향을 주지 않습니다.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// 비동기 Token Bucket.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    /// 버킷 용량
    max_tokens: f64,
    /// 초당 리필 토큰 수
    refill_rate: f64,
}

impl RateLimiter {
    /// 초당 `requests_per_second`회, 버스트 `burst`회를 허용합니다.
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let refill_rate = requests_per_second.max(f64::MIN_POSITIVE);
        let max_tokens = (burst as f64).max(1.0);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
            max_tokens,
            refill_rate,
        }
    }

    /// 버스트 없이 초당 `n`회.
    pub fn per_second(n: u32) -> Self {
        Self::new(n as f64, 1)
    }

    /// 토큰 하나를 얻을 때까지 대기합니다.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::per_second(2);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // 첫 토큰은 즉시, 이후 0.5초 간격
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let limiter = RateLimiter::new(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
