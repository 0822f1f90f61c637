use super::types::RequestInfo;
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Proxy headers carrying the caller address, in order of precedence
pub const CLIENT_ADDRESS_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "x-client-ip",
    "cf-connecting-ip",
];

/// Identifier used when nothing is known about the caller
pub const UNKNOWN_CLIENT: &str = "unknown";

fn usable(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN_CLIENT) {
        None
    } else {
        Some(value)
    }
}

/// Resolve the caller address.
///
/// Proxy headers win over the socket peer. `X-Forwarded-For` may carry a
/// chain of hops; its first entry is the original client.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in CLIENT_ADDRESS_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let candidate = if name == "x-forwarded-for" {
            value.split(',').next().and_then(usable)
        } else {
            usable(value)
        };

        if let Some(address) = candidate {
            return address.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Build the rate limiter's view of an inbound request
pub fn build_request_info(
    path: &str,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    request_id: &str,
) -> RequestInfo {
    RequestInfo::new(path, client_identifier(headers, peer), request_id).normalized()
}
