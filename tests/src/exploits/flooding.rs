//! # Request Flooding
//!
//! One address hammers the gateway; the per-address sliding window must cap
//! it without starving other callers.

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use recon_gateway::{ClientCredentials, Credential};

    use crate::support::{client_peer, seal, test_config, TestGateway};

    const LIMIT: u32 = 5;

    async fn limited_gateway() -> TestGateway {
        let mut config = test_config();
        config.rate_limit.requests_per_minute = LIMIT;
        TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await
    }

    #[tokio::test]
    async fn test_garbage_flood_capped_before_parsing() {
        let gateway = limited_gateway().await;

        for _ in 0..LIMIT {
            let (status, _) = gateway.post("garbage", client_peer(1)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, body) = gateway.post("garbage", client_peer(1)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "rate limit exceeded");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_flood_does_not_starve_other_addresses() {
        let gateway = limited_gateway().await;

        for _ in 0..(LIMIT * 3) {
            gateway.post("garbage", client_peer(1)).await;
        }

        let ops = ClientCredentials::new("ops", "hunter2");
        let (status, _) = gateway.send(&seal(&ops, "say fine", false), client_peer(2)).await;
        assert_eq!(status, StatusCode::OK);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_flood_tracked_as_one_client() {
        let gateway = limited_gateway().await;

        for _ in 0..(LIMIT * 4) {
            gateway.post("garbage", client_peer(1)).await;
        }

        let state = gateway.service.rate_limit_state();
        assert_eq!(state.tracked_clients(), 1);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_flood_admits_exactly_the_limit() {
        let gateway = limited_gateway().await;

        let results = futures::future::join_all(
            (0..40).map(|_| gateway.post("garbage", client_peer(7))),
        )
        .await;

        let admitted = results
            .iter()
            .filter(|(status, _)| *status != StatusCode::TOO_MANY_REQUESTS)
            .count();
        assert_eq!(admitted, LIMIT as usize);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_valid_requests_count_against_the_limit() {
        let gateway = limited_gateway().await;
        let ops = ClientCredentials::new("ops", "hunter2");

        for _ in 0..LIMIT {
            let (status, _) = gateway.send(&seal(&ops, "say hi", false), client_peer(3)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, _) = gateway.send(&seal(&ops, "say hi", false), client_peer(3)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        gateway.shutdown().await;
    }
}
