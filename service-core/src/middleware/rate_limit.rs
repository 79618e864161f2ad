use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address.
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Create a keyed rate limiter allowing `attempts` requests per
/// `window_seconds` for each IP, with the full quota available as burst.
fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds.max(1) * 1000) / attempts.get() as u64);
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(attempts))
        .allow_burst(attempts);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Where the rate limiter reads the client address from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIpSource {
    /// TCP peer address of the connection.
    #[default]
    Peer,
    /// First `x-forwarded-for` hop, falling back to the peer address. Only
    /// correct behind a reverse proxy that overwrites the header.
    ForwardedFor,
}

/// Middleware state: the keyed limiter plus the client address policy.
#[derive(Clone)]
pub struct IpRateLimit {
    limiter: IpRateLimiter,
    source: ClientIpSource,
}

impl IpRateLimit {
    pub fn new(attempts: u32, window_seconds: u64, source: ClientIpSource) -> Self {
        Self {
            limiter: create_ip_rate_limiter(attempts, window_seconds),
            source,
        }
    }
}

fn client_ip(request: &Request, source: ClientIpSource) -> Option<IpAddr> {
    let peer_ip = || {
        request
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|axum::extract::ConnectInfo(addr)| addr.ip())
    };

    match source {
        ClientIpSource::Peer => peer_ip(),
        ClientIpSource::ForwardedFor => request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .or_else(peer_ip),
    }
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(rate_limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request, rate_limit.source) {
        Some(ip) => match rate_limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(client_ip = %ip, "Rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        extract::ConnectInfo,
        http::StatusCode,
        middleware::from_fn_with_state,
        routing::post,
    };
    use tower::ServiceExt;

    fn app(attempts: u32, source: ClientIpSource) -> Router {
        Router::new()
            .route("/", post(|| async { "ok" }))
            .layer(from_fn_with_state(
                IpRateLimit::new(attempts, 60, source),
                ip_rate_limit_middleware,
            ))
    }

    fn request(peer: Option<&str>, forwarded_for: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(ip) = forwarded_for {
            builder = builder.header("x-forwarded-for", ip);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(ip) = peer {
            let addr = SocketAddr::new(ip.parse().unwrap(), 40000);
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[tokio::test]
    async fn rejects_after_quota_is_spent() {
        let app = app(2, ClientIpSource::Peer);

        for _ in 0..2 {
            let res = app.clone().oneshot(request(Some("10.0.0.1"), None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request(Some("10.0.0.1"), None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));

        // Other clients keep their own quota.
        let res = app.oneshot(request(Some("10.0.0.2"), None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_header_is_ignored_by_default() {
        let app = app(1, ClientIpSource::Peer);

        let res = app
            .clone()
            .oneshot(request(Some("10.0.0.1"), Some("192.0.2.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(request(Some("10.0.0.1"), Some("192.0.2.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn forwarded_header_keys_clients_behind_a_proxy() {
        let app = app(1, ClientIpSource::ForwardedFor);

        let res = app
            .clone()
            .oneshot(request(Some("10.0.0.9"), Some("192.0.2.1, 10.0.0.9")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request(Some("10.0.0.9"), Some("192.0.2.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(request(Some("10.0.0.9"), Some("192.0.2.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn passes_through_without_client_ip() {
        let app = app(1, ClientIpSource::Peer);
        for _ in 0..3 {
            let res = app.clone().oneshot(request(None, None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }
}
