//! Quota tracking from `x-ratelimit-*` response headers.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::sync::Mutex;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Last observed quota. All fields are `None` until a response carries them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Parse quota headers. Missing or malformed headers yield `None` fields.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_num::<u32>(headers, HEADER_LIMIT),
            remaining: header_num::<u32>(headers, HEADER_REMAINING),
            reset_at: header_num::<i64>(headers, HEADER_RESET)
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn is_near_limit(&self, threshold: u32) -> bool {
        matches!(self.remaining, Some(r) if r <= threshold)
    }

    /// Exhausted and the window has not rolled over yet.
    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        self.is_exhausted() && matches!(self.reset_at, Some(reset) if reset > now)
    }
}

fn header_num<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[derive(Debug)]
pub struct RateLimitTracker {
    state: Mutex<RateLimitState>,
    near_threshold: u32,
}

impl RateLimitTracker {
    pub fn new(near_threshold: u32) -> Self {
        Self {
            state: Mutex::new(RateLimitState::default()),
            near_threshold,
        }
    }

    /// Fold a response's headers in. Responses without quota headers leave
    /// the previous state alone.
    pub fn update(&self, headers: &HeaderMap) {
        let parsed = RateLimitState::from_headers(headers);
        if parsed == RateLimitState::default() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = parsed;
        if parsed.is_near_limit(self.near_threshold) {
            tracing::warn!(
                remaining = parsed.remaining,
                reset_at = ?parsed.reset_at,
                "remote rate limit nearly exhausted"
            );
        }
    }

    pub fn state(&self) -> RateLimitState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_near_limit(&self) -> bool {
        self.state().is_near_limit(self.near_threshold)
    }

    pub fn is_exhausted(&self) -> bool {
        self.state().is_exhausted()
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.state().reset_at
    }

    pub fn near_threshold(&self) -> u32 {
        self.near_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(limit: &str, remaining: &str, reset: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(HEADER_LIMIT, HeaderValue::from_str(limit).unwrap());
        h.insert(HEADER_REMAINING, HeaderValue::from_str(remaining).unwrap());
        h.insert(HEADER_RESET, HeaderValue::from_str(reset).unwrap());
        h
    }

    #[test]
    fn test_parse_headers() {
        let state = RateLimitState::from_headers(&headers("5000", "4999", "1700000000"));
        assert_eq!(state.limit, Some(5000));
        assert_eq!(state.remaining, Some(4999));
        assert_eq!(state.reset_at, DateTime::from_timestamp(1_700_000_000, 0));
        assert!(!state.is_exhausted());
    }

    #[test]
    fn test_malformed_headers_ignored() {
        let state = RateLimitState::from_headers(&headers("lots", "-1", "soon"));
        assert_eq!(state, RateLimitState::default());
    }

    #[test]
    fn test_near_and_exhausted() {
        let tracker = RateLimitTracker::new(10);
        assert!(!tracker.is_near_limit());

        tracker.update(&headers("5000", "10", "1700000000"));
        assert!(tracker.is_near_limit());
        assert!(!tracker.is_exhausted());

        tracker.update(&headers("5000", "0", "1700000000"));
        assert!(tracker.is_exhausted());
    }

    #[test]
    fn test_update_without_headers_keeps_state() {
        let tracker = RateLimitTracker::new(10);
        tracker.update(&headers("60", "0", "1700000000"));
        tracker.update(&HeaderMap::new());
        assert!(tracker.is_exhausted());
    }

    #[test]
    fn test_blocks_only_before_reset() {
        let state = RateLimitState::from_headers(&headers("60", "0", "1700000000"));
        let before = DateTime::from_timestamp(1_699_999_000, 0).unwrap();
        let after = DateTime::from_timestamp(1_700_000_001, 0).unwrap();
        assert!(state.blocks_at(before));
        assert!(!state.blocks_at(after));
    }
}
