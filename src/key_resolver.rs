use crate::error::{ThrottlerError, ThrottlerResult};
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderName;
use std::net::{IpAddr, SocketAddr};

/// Extracts the throttling key from an inbound request.
///
/// Any `Fn(&Request) -> ThrottlerResult<String>` closure is a resolver, so a
/// custom strategy (API key header, user id, ...) needs no new type.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, request: &Request) -> ThrottlerResult<String>;
}

impl<F> KeyResolver for F
where
    F: Fn(&Request) -> ThrottlerResult<String> + Send + Sync,
{
    fn resolve(&self, request: &Request) -> ThrottlerResult<String> {
        self(request)
    }
}

/// Keys requests by the IP address of the connected peer.
///
/// Reads the `ConnectInfo<SocketAddr>` extension installed by
/// `into_make_service_with_connect_info`, or a bare `SocketAddr` extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAddrResolver;

impl KeyResolver for RemoteAddrResolver {
    fn resolve(&self, request: &Request) -> ThrottlerResult<String> {
        let extensions = request.extensions();

        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
            .or_else(|| extensions.get::<SocketAddr>().copied())
            .map(|addr| addr.ip().to_canonical().to_string())
            .ok_or_else(|| {
                ThrottlerError::MalformedAddress("request carries no remote address".to_string())
            })
    }
}

/// Keys requests by a client address forwarded by a proxy in a header.
///
/// Only the first comma-separated entry is used, which is the original client
/// when every proxy in the chain appends to the header.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    header: HeaderName,
}

impl HeaderResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn forwarded_for() -> Self {
        Self::new(HeaderName::from_static("x-forwarded-for"))
    }

    pub fn real_ip() -> Self {
        Self::new(HeaderName::from_static("x-real-ip"))
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl KeyResolver for HeaderResolver {
    fn resolve(&self, request: &Request) -> ThrottlerResult<String> {
        let value = request
            .headers()
            .get(&self.header)
            .ok_or_else(|| ThrottlerError::MalformedAddress(format!("missing {} header", self.header)))?
            .to_str()
            .map_err(|_| ThrottlerError::MalformedAddress(format!("non-ASCII {} header", self.header)))?;

        let first = value.split(',').next().unwrap_or(value).trim();
        parse_remote_addr(first).map(|ip| ip.to_string())
    }
}

/// Parse a client address, with or without a port.
///
/// Accepts `1.2.3.4`, `1.2.3.4:8080`, `::1`, `[::1]` and `[::1]:8080`.
pub fn parse_remote_addr(addr: &str) -> ThrottlerResult<IpAddr> {
    let addr = addr.trim();

    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip.to_canonical());
    }
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok(socket.ip().to_canonical());
    }
    if let Some(ip) = addr
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
    {
        return Ok(ip.to_canonical());
    }

    Err(ThrottlerError::MalformedAddress(addr.to_string()))
}
