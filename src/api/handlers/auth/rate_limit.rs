//! Rate limiting primitives for auth flows.
//!
//! Windows are fixed, keyed by `(peer address, route class)`, and reset once
//! their start is older than the window length. The check increments first and
//! then compares, so concurrent requests can never both take the last slot.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::HeaderName,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use super::error::ApiError;
use super::state::AuthState;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const GENERAL_LIMIT: u32 = 100;
pub const AUTH_LIMIT: u32 = 5;

/// Proxy headers that must never influence the client address.
const PROXY_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "forwarded"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Every `/api` route.
    General,
    /// Login, registration and refresh.
    Auth,
}

impl RouteClass {
    #[must_use]
    pub fn limit(self) -> u32 {
        match self {
            Self::General => GENERAL_LIMIT,
            Self::Auth => AUTH_LIMIT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, addr: IpAddr, class: RouteClass) -> RateLimitDecision;
    /// Give back one attempt, used when an auth attempt succeeds.
    fn refund(&self, addr: IpAddr, class: RouteClass);
    /// Drop expired windows; returns how many were removed.
    fn sweep(&self) -> usize;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _addr: IpAddr, _class: RouteClass) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn refund(&self, _addr: IpAddr, _class: RouteClass) {}

    fn sweep(&self) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    start: Instant,
}

/// In-process fixed-window limiter.
#[derive(Debug)]
pub struct WindowRateLimiter {
    window: Duration,
    windows: Mutex<HashMap<(IpAddr, RouteClass), Window>>,
}

impl Default for WindowRateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn check_at(&self, addr: IpAddr, class: RouteClass, now: Instant) -> RateLimitDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = windows.entry((addr, class)).or_insert(Window { count: 0, start: now });
        if now.saturating_duration_since(entry.start) >= self.window {
            *entry = Window { count: 0, start: now };
        }
        entry.count = entry.count.saturating_add(1);
        if entry.count > class.limit() {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = windows.len();
        windows.retain(|_, window| now.saturating_duration_since(window.start) < self.window);
        before - windows.len()
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check(&self, addr: IpAddr, class: RouteClass) -> RateLimitDecision {
        self.check_at(addr, class, Instant::now())
    }

    fn refund(&self, addr: IpAddr, class: RouteClass) {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(window) = windows.get_mut(&(addr, class)) {
            window.count = window.count.saturating_sub(1);
        }
    }

    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }
}

/// Peer address of the TCP connection. Falls back to the unspecified address
/// when the server was not started with connect info.
pub(crate) fn client_addr(connect_info: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    connect_info.map_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED), |info| info.0.ip())
}

/// Remove client-supplied proxy address headers before routing.
pub async fn strip_proxy_headers(mut request: Request<Body>, next: Next) -> Response {
    for name in PROXY_ADDRESS_HEADERS {
        request.headers_mut().remove(HeaderName::from_static(name));
    }
    next.run(request).await
}

/// General per-address limit applied to every `/api` route.
pub async fn general_limit(
    State(auth_state): State<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let addr = client_addr(connect_info.as_ref());
    if auth_state.rate_limiter().check(addr, RouteClass::General) == RateLimitDecision::Limited {
        warn!(client = %addr, "general rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
