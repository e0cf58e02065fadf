//! # Address Spoofing
//!
//! Forged `X-Forwarded-For` headers and address tricks aimed at the
//! allow-lists and the per-address limiter.

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv6Addr, SocketAddr};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use recon_gateway::{ClientCredentials, CommandRequest, Credential};

    use crate::support::{client_peer, seal, test_config, TestGateway};

    fn forwarded(request: &CommandRequest, forwarded_for: &str) -> Request<Body> {
        Request::post("/")
            .header("content-type", "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(serde_json::to_vec(request).unwrap()))
            .unwrap()
    }

    fn pinned() -> Credential {
        Credential::new("pinned", "pw").with_allowed_ip("10.9.9.9")
    }

    fn creds() -> ClientCredentials {
        ClientCredentials::new("pinned", "pw")
    }

    fn untrusted_peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 5], 50_000))
    }

    fn proxy_peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50_000))
    }

    #[tokio::test]
    async fn test_forged_header_from_untrusted_peer_ignored() {
        let gateway = TestGateway::new(vec![pinned()]).await;
        let request = seal(&creds(), "say in", false);

        let (status, _) = gateway
            .call(forwarded(&request, "10.9.9.9"), untrusted_peer())
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Rejection left the nonce unspent; the real address can still use it
        let real = SocketAddr::from(([10, 9, 9, 9], 50_000));
        let (status, _) = gateway.send(&request, real).await;
        assert_eq!(status, StatusCode::OK);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_trusted_proxy_forwards_client_address() {
        let mut config = test_config();
        config.http.trusted_proxies = vec![IpAddr::from([127, 0, 0, 1])];
        let gateway = TestGateway::with_config(config, vec![pinned()]).await;

        let request = seal(&creds(), "say via proxy", false);
        let (status, _) = gateway
            .call(forwarded(&request, "10.9.9.9, 127.0.0.1"), proxy_peer())
            .await;
        assert_eq!(status, StatusCode::OK);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_rotating_header_does_not_escape_rate_limit() {
        let mut config = test_config();
        config.rate_limit.requests_per_minute = 3;
        let gateway = TestGateway::with_config(config, vec![pinned()]).await;

        let mut statuses = Vec::new();
        for i in 0..6u8 {
            let request = seal(&creds(), "say x", false);
            let (status, _) = gateway
                .call(forwarded(&request, &format!("172.16.0.{i}")), untrusted_peer())
                .await;
            statuses.push(status);
        }

        let limited = statuses
            .iter()
            .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
            .count();
        assert_eq!(limited, 3);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_proxied_clients_limited_independently() {
        let mut config = test_config();
        config.rate_limit.requests_per_minute = 2;
        config.http.trusted_proxies = vec![IpAddr::from([127, 0, 0, 1])];
        let gateway = TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await;
        let ops = ClientCredentials::new("ops", "hunter2");

        for client in ["10.1.1.1", "10.2.2.2"] {
            for _ in 0..2 {
                let request = seal(&ops, "say hi", false);
                let (status, _) = gateway.call(forwarded(&request, client), proxy_peer()).await;
                assert_eq!(status, StatusCode::OK);
            }
            let request = seal(&ops, "say hi", false);
            let (status, _) = gateway.call(forwarded(&request, client), proxy_peer()).await;
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        }

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_global_allow_list() {
        let mut config = test_config();
        config.security.global_ip_allowlist = vec!["10.0.0.1".to_string()];
        let gateway = TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await;
        let ops = ClientCredentials::new("ops", "hunter2");

        let (status, body) = gateway.send(&seal(&ops, "say no", false), client_peer(2)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert!(gateway.dispatcher.log().is_empty());

        let (status, _) = gateway.send(&seal(&ops, "say yes", false), client_peer(1)).await;
        assert_eq!(status, StatusCode::OK);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_mapped_ipv6_matches_ipv4_entry() {
        let credential = Credential::new("pinned", "pw").with_allowed_ip("10.0.0.1");
        let gateway = TestGateway::new(vec![credential]).await;

        let mapped = Ipv6Addr::from([0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001]);
        let peer = SocketAddr::new(IpAddr::V6(mapped), 50_000);
        let (status, _) = gateway.send(&seal(&creds(), "say v6", false), peer).await;
        assert_eq!(status, StatusCode::OK);

        gateway.shutdown().await;
    }
}
