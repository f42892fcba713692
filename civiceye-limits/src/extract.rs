use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Find the key identifying the client behind a request.
///
/// The peer address is used when the server runs with
/// `into_make_service_with_connect_info`. `X-Forwarded-For` is only read
/// when `trust_forwarded_for` is set, i.e. when a single reverse proxy
/// appends the address it received the request from: the right-most hop is
/// the only one a client cannot forge.
pub fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = req
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return forwarded.to_owned();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
}
