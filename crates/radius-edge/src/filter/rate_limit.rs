//! Per-NAS token bucket

use super::{Filter, FilterError};
use crate::module::Request;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;

/// `rate_limit` filter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second from one source IP (default: 100)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Requests one source IP may send in a burst (default: 200)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> u32 {
    100
}

fn default_burst() -> u32 {
    200
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    pub fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Drops requests from a source that exceeds its token bucket
pub struct RateLimitFilter {
    buckets: DashMap<IpAddr, Bucket>,
    rate: f64,
    capacity: f64,
}

impl RateLimitFilter {
    pub const NAME: &'static str = "rate_limit";

    pub fn new(config: RateLimitConfig) -> Result<Self, FilterError> {
        if config.requests_per_second == 0 {
            return Err(FilterError::config(Self::NAME, "requests_per_second must be positive"));
        }
        if config.burst == 0 {
            return Err(FilterError::config(Self::NAME, "burst must be positive"));
        }

        Ok(Self {
            buckets: DashMap::new(),
            rate: f64::from(config.requests_per_second),
            capacity: f64::from(config.burst),
        })
    }

    fn try_acquire(&self, source: IpAddr) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(source).or_insert_with(|| Bucket {
            tokens: self.capacity,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, _listener: &str, request: &Request) -> Result<(), FilterError> {
        let source = request.remote_addr.ip();
        if self.try_acquire(source) {
            Ok(())
        } else {
            Err(FilterError::rejected(
                Self::NAME,
                format!("{} exceeded {} requests/s", source, self.rate),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_proto::{Code, Packet};

    fn from(remote: &str) -> Request {
        Request::new(
            Packet::new(Code::AccountingRequest, 1, [0u8; 16]),
            remote.parse().unwrap(),
            b"secret".to_vec(),
        )
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let filter = RateLimitFilter::new(
            RateLimitConfig::default()
                .with_requests_per_second(1)
                .with_burst(3),
        )
        .unwrap();

        for _ in 0..3 {
            filter.process("wifi", &from("10.1.1.1:1000")).await.unwrap();
        }
        assert!(matches!(
            filter.process("wifi", &from("10.1.1.1:1001")).await,
            Err(FilterError::Rejected { filter, .. }) if filter == "rate_limit"
        ));

        // Buckets are per source IP
        filter.process("wifi", &from("10.2.2.2:1000")).await.unwrap();
    }

    #[test]
    fn test_invalid_config() {
        let zero_rate = RateLimitConfig::default().with_requests_per_second(0);
        assert!(matches!(
            RateLimitFilter::new(zero_rate),
            Err(FilterError::Config { .. })
        ));
        assert!(RateLimitFilter::new(RateLimitConfig::default().with_burst(0)).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: RateLimitConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RateLimitConfig::default());
    }
}
