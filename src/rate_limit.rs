//! Per-IP request throttling for the coordination tool surface, with a
//! tighter quota on task-claim traffic than on reads.

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState},
    Quota, RateLimiter,
};
use std::{net::IpAddr, net::SocketAddr, num::NonZeroU32, sync::Arc};

pub const REQUESTS_PER_MINUTE: u32 = 120;
pub const CLAIM_REQUESTS_PER_MINUTE: u32 = 20;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    general: Arc<KeyedLimiter>,
    claim: Arc<KeyedLimiter>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            general: Arc::new(RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap(),
            ))),
            claim: Arc::new(RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(CLAIM_REQUESTS_PER_MINUTE).unwrap(),
            ))),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limits): axum::extract::State<RateLimitConfig>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let limiter = if request.uri().path().ends_with("/claim") {
        &limits.claim
    } else {
        &limits.general
    };

    if limiter.check_key(&addr.ip()).is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_quota_is_tighter_than_general() {
        let limits = RateLimitConfig::new();
        assert!(limits.general.check_key(&"127.0.0.1".parse().unwrap()).is_ok());
        assert!(limits.claim.check_key(&"127.0.0.1".parse().unwrap()).is_ok());
        assert!(CLAIM_REQUESTS_PER_MINUTE < REQUESTS_PER_MINUTE);
    }
}
