//! Rate limit keys derived from the connection's source address.

use axum::extract::{ConnectInfo, Request};
use std::fmt;
use std::net::SocketAddr;

/// Key shared by every request whose source address cannot be determined.
///
/// All such clients draw from a single bucket. This only happens when the
/// router is served without connect info.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client identity used as the rate limiter key: the source IP, no port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.ip().to_string())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_string())
    }

    pub fn from_request(request: &Request) -> Self {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self::from_addr(*addr))
            .unwrap_or_else(Self::unknown)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
