use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use arbor_data::shared::subscription_models::VenueId;

/*----- */
// Config
/*----- */
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_window: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_window: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

/*----- */
// Per venue bucket
/*----- */
#[derive(Debug)]
struct VenueBucket {
    config: RateLimitConfig,
    tokens: u32,
    last_refill: Instant,
    backoff_until: Option<Instant>,
    current_backoff: Duration,
    total_requests: u64,
    throttle_errors: u64,
    window_requests: VecDeque<Instant>,
}

impl VenueBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: Instant::now(),
            backoff_until: None,
            current_backoff: config.initial_backoff,
            total_requests: 0,
            throttle_errors: 0,
            window_requests: VecDeque::new(),
            config,
        }
    }

    // Continuous refill: floor((elapsed / refill_window) * capacity) tokens,
    // advancing last_refill only by the credited amount so fractional
    // progress is never lost.
    fn refill(&mut self, now: Instant) {
        if self.tokens >= self.config.capacity {
            self.last_refill = now;
            return;
        }

        let elapsed = now.duration_since(self.last_refill);
        let per_token = self.config.refill_window.as_secs_f64() / self.config.capacity as f64;
        let earned = (elapsed.as_secs_f64() / per_token).floor() as u32;
        if earned == 0 {
            return;
        }

        self.tokens = (self.tokens + earned).min(self.config.capacity);
        self.last_refill += Duration::from_secs_f64(per_token * earned as f64);
    }

    fn prune_window(&mut self, now: Instant) {
        while let Some(front) = self.window_requests.front() {
            if now.duration_since(*front) > self.config.refill_window {
                self.window_requests.pop_front();
            } else {
                break;
            }
        }
    }

    // Returns None when a token was taken, otherwise how long to wait. A
    // venue both out of tokens and in backoff waits for the later deadline.
    fn try_acquire(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        self.prune_window(now);

        let backoff_wait = self.backoff_until.and_then(|until| {
            if now < until {
                Some(until.duration_since(now))
            } else {
                None
            }
        });

        let token_wait = if self.tokens == 0 {
            let per_token =
                self.config.refill_window.as_secs_f64() / self.config.capacity as f64;
            let since_refill = now.duration_since(self.last_refill).as_secs_f64();
            Some(Duration::from_secs_f64((per_token - since_refill).max(0.0)))
        } else {
            None
        };

        match (backoff_wait, token_wait) {
            (None, None) => {
                self.tokens -= 1;
                self.total_requests += 1;
                self.window_requests.push_back(now);
                None
            }
            (Some(backoff), Some(token)) => Some(backoff.max(token)),
            (Some(backoff), None) => Some(backoff),
            (None, Some(token)) => Some(token),
        }
    }
}

/*----- */
// Stats
/*----- */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub in_flight_window: usize,
    pub throttle_error_count: u64,
    pub current_backoff: Duration,
    pub throttled: bool,
}

/*----- */
// Rate limiter
/*----- */
// One token bucket per venue, shaping every outbound request. Throttling
// signals from the venue push the bucket into an exponential backoff window.
#[derive(Debug)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    venue_configs: HashMap<VenueId, RateLimitConfig>,
    buckets: Mutex<HashMap<VenueId, VenueBucket>>,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            venue_configs: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_venue_config(mut self, venue: VenueId, config: RateLimitConfig) -> Self {
        self.venue_configs.insert(venue, config);
        self
    }

    fn config_for(&self, venue: &VenueId) -> RateLimitConfig {
        self.venue_configs
            .get(venue)
            .copied()
            .unwrap_or(self.default_config)
    }

    // Cooperatively blocks until a token is available and the venue is not
    // inside a backoff window.
    pub async fn acquire(&self, venue: &VenueId) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(venue.clone())
                    .or_insert_with(|| VenueBucket::new(self.config_for(venue)));
                bucket.try_acquire(Instant::now())
            };

            match wait {
                None => return,
                Some(wait) => {
                    debug!(
                        venue = %venue,
                        wait_ms = wait.as_millis() as u64,
                        message = "rate limiter waiting for token"
                    );
                    sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    // Called when the outbound layer observed a throttling signal from the
    // venue. Enters backoff for the current window, then grows the window.
    pub fn on_throttled(&self, venue: &VenueId) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(venue.clone())
            .or_insert_with(|| VenueBucket::new(self.config_for(venue)));

        bucket.throttle_errors += 1;
        bucket.backoff_until = Some(Instant::now() + bucket.current_backoff);

        let grown = bucket.current_backoff.as_secs_f64() * bucket.config.backoff_multiplier;
        bucket.current_backoff = Duration::from_secs_f64(grown)
            .min(bucket.config.max_backoff);

        warn!(
            venue = %venue,
            backoff_ms = bucket.current_backoff.as_millis() as u64,
            throttle_errors = bucket.throttle_errors,
            message = "venue throttled, entering backoff"
        );
    }

    pub fn on_success(&self, venue: &VenueId) {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(venue) {
            bucket.current_backoff = bucket.config.initial_backoff;
            bucket.backoff_until = None;
        }
    }

    pub fn stats(&self, venue: &VenueId) -> RateLimiterStats {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(venue.clone())
            .or_insert_with(|| VenueBucket::new(self.config_for(venue)));

        let now = Instant::now();
        bucket.prune_window(now);
        RateLimiterStats {
            total_requests: bucket.total_requests,
            in_flight_window: bucket.window_requests.len(),
            throttle_error_count: bucket.throttle_errors,
            current_backoff: bucket.current_backoff,
            throttled: bucket.backoff_until.map(|until| now < until).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn venue() -> VenueId {
        VenueId::new("venue_a")
    }

    fn small_config() -> RateLimitConfig {
        RateLimitConfig {
            capacity: 2,
            refill_window: Duration::from_millis(100),
            initial_backoff: Duration::from_millis(80),
            max_backoff: Duration::from_millis(400),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(small_config());

        let start = Instant::now();
        limiter.acquire(&venue()).await;
        limiter.acquire(&venue()).await;
        // Bucket exhausted, third acquire must wait for a refill
        limiter.acquire(&venue()).await;
        assert!(start.elapsed() >= Duration::from_millis(40));

        let stats = limiter.stats(&venue());
        assert_eq!(stats.total_requests, 3);
    }

    #[tokio::test]
    async fn test_no_token_before_backoff_elapses() {
        let limiter = RateLimiter::new(small_config());
        limiter.on_throttled(&venue());

        assert!(limiter.stats(&venue()).throttled);

        let start = Instant::now();
        limiter.acquire(&venue()).await;
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_backoff_grows_and_resets() {
        let limiter = RateLimiter::new(small_config());

        limiter.on_throttled(&venue());
        assert_eq!(
            limiter.stats(&venue()).current_backoff,
            Duration::from_millis(160)
        );

        limiter.on_throttled(&venue());
        assert_eq!(
            limiter.stats(&venue()).current_backoff,
            Duration::from_millis(320)
        );

        // Capped
        limiter.on_throttled(&venue());
        assert_eq!(
            limiter.stats(&venue()).current_backoff,
            Duration::from_millis(400)
        );

        limiter.on_success(&venue());
        let stats = limiter.stats(&venue());
        assert_eq!(stats.current_backoff, Duration::from_millis(80));
        assert!(!stats.throttled);
    }

    #[tokio::test]
    async fn test_throttle_count_in_stats() {
        let limiter = RateLimiter::new(small_config());
        limiter.on_throttled(&venue());
        limiter.on_throttled(&venue());
        assert_eq!(limiter.stats(&venue()).throttle_error_count, 2);
    }
}
