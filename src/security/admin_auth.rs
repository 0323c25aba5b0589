use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::error::ErrorResponse;

#[derive(Clone)]
pub struct AdminAuthConfig {
    pub admin_token: Option<String>,
    pub allowed_ips: Vec<IpNetwork>,
    /// Peers whose X-Forwarded-For / X-Real-IP headers are believed.
    pub trusted_proxies: Vec<IpNetwork>,
}

impl AdminAuthConfig {
    pub fn new(admin_token: Option<String>, allowed_ips: Vec<IpNetwork>) -> Self {
        Self {
            admin_token,
            allowed_ips,
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpNetwork>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.admin_token.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Denial {
    Disabled,
    Forbidden(Option<IpAddr>),
    Unauthorized,
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Denial::Disabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "admin_disabled",
                "Admin API disabled: ADMIN_TOKEN is not configured".to_string(),
            ),
            Denial::Forbidden(Some(ip)) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                format!("Access denied for IP address: {}", ip),
            ),
            Denial::Forbidden(None) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Could not determine client IP".to_string(),
            ),
            Denial::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid bearer token".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
            cause: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Guard for every admin route.
///
/// Checks, in order:
/// 1. ADMIN_TOKEN is configured (503 otherwise)
/// 2. Source IP is loopback or inside ALLOWED_ADMIN_IPS (403 otherwise)
/// 3. `Authorization: Bearer <token>` matches (401 otherwise)
pub async fn admin_auth_middleware(
    State(config): State<Arc<AdminAuthConfig>>,
    req: Request,
    next: Next,
) -> Response {
    match authorize(&config, &req) {
        Ok(ip) => {
            tracing::debug!("Admin request {} {} from {}", req.method(), req.uri().path(), ip);
            next.run(req).await
        }
        Err(denial) => {
            tracing::warn!(
                "Admin request {} {} rejected: {:?}",
                req.method(),
                req.uri().path(),
                denial
            );
            denial.into_response()
        }
    }
}

fn authorize(config: &AdminAuthConfig, req: &Request) -> Result<IpAddr, Denial> {
    let admin_token = config.admin_token.as_deref().ok_or(Denial::Disabled)?;

    let source_ip =
        extract_client_ip(req, &config.trusted_proxies).ok_or(Denial::Forbidden(None))?;
    if !is_ip_allowed(&config.allowed_ips, source_ip) {
        return Err(Denial::Forbidden(Some(source_ip)));
    }

    let token = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(Denial::Unauthorized)?;

    if !constant_time_compare(token, admin_token) {
        return Err(Denial::Unauthorized);
    }

    Ok(source_ip)
}

/// Client address of the request.
///
/// The peer address is authoritative. Forwarding headers are read only when
/// the peer is a trusted proxy: the rightmost X-Forwarded-For hop that is not
/// itself a trusted proxy, else X-Real-IP. A forwarded loopback address
/// yields `None`.
fn extract_client_ip(req: &Request, trusted_proxies: &[IpNetwork]) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())?;

    if !trusted_proxies.iter().any(|network| network.contains(peer)) {
        return Some(peer);
    }

    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            s.rsplit(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|ip| !trusted_proxies.iter().any(|network| network.contains(*ip)))
        })
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        });

    match forwarded {
        Some(ip) if ip.is_loopback() => None,
        Some(ip) => Some(ip),
        None => Some(peer),
    }
}

fn is_ip_allowed(allowed_networks: &[IpNetwork], ip: IpAddr) -> bool {
    ip.is_loopback() || allowed_networks.iter().any(|network| network.contains(ip))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use std::str::FromStr;
    use tower::ServiceExt;

    fn guarded_router(config: AdminAuthConfig) -> Router {
        Router::new()
            .route("/config", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(config),
                admin_auth_middleware,
            ))
    }

    fn request_with(peer: &str, token: Option<&str>, headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/config");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let mut req = builder.body(Body::empty()).unwrap();

        let peer: IpAddr = peer.parse().unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(peer, 40000)));
        req
    }

    fn request(peer: &str, token: Option<&str>) -> Request {
        request_with(peer, token, &[])
    }

    fn nets(list: &[&str]) -> Vec<IpNetwork> {
        list.iter().map(|n| IpNetwork::from_str(n).unwrap()).collect()
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("short", "longer"));
    }

    #[test]
    fn test_is_ip_allowed() {
        let allowed = nets(&["10.0.1.0/24"]);
        assert!(is_ip_allowed(&allowed, "127.0.0.1".parse().unwrap()));
        assert!(is_ip_allowed(&allowed, "::1".parse().unwrap()));
        assert!(is_ip_allowed(&allowed, "10.0.1.200".parse().unwrap()));
        assert!(!is_ip_allowed(&allowed, "10.0.2.1".parse().unwrap()));
        assert!(!is_ip_allowed(&allowed, "8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_authorize_order() {
        let disabled = AdminAuthConfig::new(None, vec![]);
        assert!(!disabled.is_enabled());
        assert_eq!(
            authorize(&disabled, &request("127.0.0.1", Some("t"))),
            Err(Denial::Disabled)
        );

        let config = AdminAuthConfig::new(Some("t0ken".to_string()), vec![]);
        assert_eq!(
            authorize(&config, &request("203.0.113.9", Some("t0ken"))),
            Err(Denial::Forbidden(Some("203.0.113.9".parse().unwrap())))
        );
        assert_eq!(
            authorize(&config, &request("127.0.0.1", Some("wrong"))),
            Err(Denial::Unauthorized)
        );
        assert_eq!(
            authorize(&config, &request("127.0.0.1", Some("t0ken"))),
            Ok("127.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn test_missing_peer_address_is_forbidden() {
        let req = axum::http::Request::builder()
            .uri("/config")
            .header("x-forwarded-for", "127.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req, &[]), None);

        let config = AdminAuthConfig::new(Some("t0ken".to_string()), vec![]);
        assert_eq!(authorize(&config, &req), Err(Denial::Forbidden(None)));
    }

    #[test]
    fn test_forwarded_headers_ignored_from_untrusted_peer() {
        let config = AdminAuthConfig::new(Some("t0ken".to_string()), nets(&["10.0.1.0/24"]));

        let spoofed = request_with(
            "203.0.113.9",
            Some("t0ken"),
            &[("x-forwarded-for", "127.0.0.1"), ("x-real-ip", "10.0.1.5")],
        );
        assert_eq!(
            extract_client_ip(&spoofed, &config.trusted_proxies),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(
            authorize(&config, &spoofed),
            Err(Denial::Forbidden(Some("203.0.113.9".parse().unwrap())))
        );
    }

    #[test]
    fn test_forwarded_headers_from_trusted_proxy() {
        let proxies = nets(&["10.9.0.0/16"]);

        // Rightmost hop that is not a proxy is the client
        let req = request_with(
            "10.9.0.2",
            None,
            &[("x-forwarded-for", "127.0.0.1, 198.51.100.7, 10.9.0.3")],
        );
        assert_eq!(
            extract_client_ip(&req, &proxies),
            Some("198.51.100.7".parse().unwrap())
        );

        let req = request_with("10.9.0.2", None, &[("x-real-ip", "10.0.1.5")]);
        assert_eq!(extract_client_ip(&req, &proxies), Some("10.0.1.5".parse().unwrap()));

        let req = request_with("10.9.0.2", None, &[]);
        assert_eq!(extract_client_ip(&req, &proxies), Some("10.9.0.2".parse().unwrap()));

        // A proxy never vouches for loopback
        let req = request_with("10.9.0.2", None, &[("x-forwarded-for", "::1")]);
        assert_eq!(extract_client_ip(&req, &proxies), None);
    }

    #[tokio::test]
    async fn test_middleware_status_codes() {
        let config = AdminAuthConfig::new(Some("t0ken".to_string()), nets(&["10.0.1.0/24"]));

        let resp = guarded_router(config.clone())
            .oneshot(request("10.0.1.5", Some("t0ken")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = guarded_router(config.clone())
            .oneshot(request("10.0.1.5", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = guarded_router(config.clone())
            .oneshot(request("192.168.1.1", Some("t0ken")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = guarded_router(config)
            .oneshot(request_with(
                "203.0.113.9",
                Some("t0ken"),
                &[("x-forwarded-for", "127.0.0.1")],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = guarded_router(AdminAuthConfig::new(None, vec![]))
            .oneshot(request("127.0.0.1", Some("t0ken")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
