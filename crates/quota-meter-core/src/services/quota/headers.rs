//! Rate-limit response headers
//!
//! Any response the hosting application receives may carry
//! `X-RateLimit-Limit` and `X-RateLimit-Remaining`. Several independent limits
//! share these header names, so the values are only parsed here; deciding
//! whether they belong to the account tier is the estimator's job.

use reqwest::header::HeaderMap;

/// Header carrying the quota ceiling
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header carrying the requests left in the window
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// A pair of rate-limit header values as observed on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: i64,
    pub remaining: i64,
}

impl RateLimitHeaders {
    pub fn new(limit: i64, remaining: i64) -> Self {
        Self { limit, remaining }
    }

    /// Parse raw header strings; `None` when either is not an integer
    pub fn parse(limit: &str, remaining: &str) -> Option<Self> {
        let limit = limit.trim().parse::<i64>().ok()?;
        let remaining = remaining.trim().parse::<i64>().ok()?;
        Some(Self { limit, remaining })
    }

    /// Extract both headers from a response header map
    ///
    /// Returns `None` if either header is missing, not valid UTF-8, or not an
    /// integer.
    pub fn from_header_map(headers: &HeaderMap) -> Option<Self> {
        let limit = headers.get(LIMIT_HEADER)?.to_str().ok()?;
        let remaining = headers.get(REMAINING_HEADER)?.to_str().ok()?;
        Self::parse(limit, remaining)
    }

    /// Requests used according to these headers, if the pair is coherent
    pub fn used(&self) -> Option<u64> {
        if self.limit < 0 || self.remaining < 0 || self.remaining > self.limit {
            return None;
        }
        Some((self.limit - self.remaining) as u64)
    }
}
