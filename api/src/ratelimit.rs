use governor::{DefaultDirectRateLimiter, Quota};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Named budgets shared by every request in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Queries against the search engine.
    Search,
    /// Requests that go out to the lyrics site.
    Scrape,
    /// Everything else, spent on entry to a route.
    Other,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Search => "search",
            Bucket::Scrape => "scrape",
            Bucket::Other => "other",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait RateLimiter: Send + Sync {
    /// Consumes one unit of `bucket`, returning false when it is exhausted.
    fn allow(&self, bucket: Bucket) -> bool;
}

pub struct GovernorLimiter {
    search: DefaultDirectRateLimiter,
    scrape: DefaultDirectRateLimiter,
    other: DefaultDirectRateLimiter,
}

fn window(limit: u32, per: Duration) -> Quota {
    Quota::with_period(per / limit)
        .expect("valid limiter period")
        .allow_burst(NonZeroU32::new(limit).expect("non-zero limiter burst"))
}

impl GovernorLimiter {
    pub fn new() -> Self {
        Self {
            search: governor::RateLimiter::direct(window(5, Duration::from_secs(15))),
            scrape: governor::RateLimiter::direct(window(3, Duration::from_secs(10))),
            other: governor::RateLimiter::direct(window(20, Duration::from_secs(1))),
        }
    }
}

impl Default for GovernorLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for GovernorLimiter {
    fn allow(&self, bucket: Bucket) -> bool {
        let limiter = match bucket {
            Bucket::Search => &self.search,
            Bucket::Scrape => &self.scrape,
            Bucket::Other => &self.other,
        };
        let allowed = limiter.check().is_ok();
        if !allowed {
            tracing::warn!("rate limit exceeded for bucket {}", bucket);
        }
        allowed
    }
}
