//! Client address resolution and allow-list checks.
//!
//! Prevents IP spoofing via X-Forwarded-For header manipulation.
//! Only trusted proxies can set forwarded headers.

use axum::{body::Body, extract::ConnectInfo, http::HeaderMap, http::Request, response::Response};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolved caller address, inserted as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Determine the real client IP based on trusted proxy configuration.
///
/// The socket peer is the client unless it is a trusted proxy, in which case
/// the first parseable `X-Forwarded-For` entry wins.
pub fn resolve_client_ip(peer: IpAddr, headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> IpAddr {
    let forwarded = headers.get(FORWARDED_FOR);

    if !trusted_proxies.contains(&peer) {
        if let Some(forwarded) = forwarded {
            warn!(
                direct_ip = %peer,
                forwarded = ?forwarded,
                "Ignoring X-Forwarded-For from untrusted source"
            );
        }
        return peer;
    }

    let first = forwarded
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    match first {
        Some(ip) => {
            debug!(proxy = %peer, extracted_ip = %ip, "Extracted client IP from header");
            ip
        }
        None => peer,
    }
}

/// Layer that attaches [`ClientIp`] to every request.
#[derive(Clone)]
pub struct ClientIpLayer {
    trusted_proxies: Arc<[IpAddr]>,
}

impl ClientIpLayer {
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            trusted_proxies: trusted_proxies.into(),
        }
    }
}

impl<S> Layer<S> for ClientIpLayer {
    type Service = ClientIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientIpService {
            inner,
            trusted_proxies: Arc::clone(&self.trusted_proxies),
        }
    }
}

/// Client IP resolution service
#[derive(Clone)]
pub struct ClientIpService<S> {
    inner: S,
    trusted_proxies: Arc<[IpAddr]>,
}

impl<S> Service<Request<Body>> for ClientIpService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let trusted = Arc::clone(&self.trusted_proxies);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

            let client = resolve_client_ip(peer, req.headers(), &trusted);
            req.extensions_mut().insert(ClientIp(client));
            inner.call(req).await
        })
    }
}

/// A set of permitted caller addresses. Empty permits everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addresses: HashSet<IpAddr>,
    literals: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<IpAddr>() {
                Ok(ip) => {
                    list.addresses.insert(ip.to_canonical());
                }
                Err(_) => {
                    list.literals.insert(entry.to_string());
                }
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.literals.is_empty()
    }

    /// Whether `ip` may proceed
    pub fn permits(&self, ip: IpAddr) -> bool {
        self.is_empty()
            || self.addresses.contains(&ip.to_canonical())
            || self.literals.contains(&ip.to_string())
    }
}
