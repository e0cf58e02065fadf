//! # Replay Attacks
//!
//! A passive observer captures a valid request and resubmits it, alone or
//! with altered framing.

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use recon_gateway::client::random_nonce;
    use recon_gateway::{ClientCredentials, Credential};

    use crate::support::{client_peer, seal, unix_now, TestGateway};

    fn ops() -> ClientCredentials {
        ClientCredentials::new("ops", "hunter2")
    }

    async fn gateway() -> TestGateway {
        TestGateway::new(vec![Credential::new("ops", "hunter2")]).await
    }

    #[tokio::test]
    async fn test_verbatim_replay_rejected() {
        let gateway = gateway().await;
        let captured = seal(&ops(), "say once", false);

        let (status, _) = gateway.send(&captured, client_peer(1)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = gateway.send(&captured, client_peer(2)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "nonce already used");

        // Executed exactly once
        let runs = gateway
            .dispatcher
            .log()
            .iter()
            .filter(|d| d.command == "say once")
            .count();
        assert_eq!(runs, 1);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_parallel_replay_admits_one() {
        let gateway = gateway().await;
        let captured = seal(&ops(), "say race", false);

        let statuses = futures::future::join_all(
            (0..16).map(|i| gateway.send(&captured, client_peer(i + 1))),
        )
        .await;

        let accepted = statuses
            .iter()
            .filter(|(status, _)| *status == StatusCode::OK)
            .count();
        assert_eq!(accepted, 1);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_capture_rejected() {
        let gateway = gateway().await;
        let stale = ops()
            .seal("say old", false, &random_nonce(), unix_now() - 600)
            .unwrap();

        let (status, body) = gateway.send(&stale, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "timestamp out of range");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_future_dated_request_rejected() {
        let gateway = gateway().await;
        let early = ops()
            .seal("say soon", false, &random_nonce(), unix_now() + 600)
            .unwrap();

        let (status, _) = gateway.send(&early, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_refreshed_timestamp_with_captured_nonce() {
        let gateway = gateway().await;
        let captured = seal(&ops(), "say once", false);
        gateway.send(&captured, client_peer(1)).await;

        // Attacker updates the timestamp but cannot re-seal without the secret
        let mut forged = captured.clone();
        forged.timestamp += 1;
        let (status, _) = gateway.send(&forged, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecryptable_request_still_burns_nonce() {
        let gateway = gateway().await;
        let nonce = random_nonce();
        let now = unix_now();

        let wrong_key = ClientCredentials::new("ops", "guess")
            .seal("say x", false, &nonce, now)
            .unwrap();
        let (status, _) = gateway.send(&wrong_key, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let genuine = ops().seal("say x", false, &nonce, now).unwrap();
        let (status, body) = gateway.send(&genuine, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "nonce already used");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_response_cannot_be_replayed_as_request() {
        let gateway = gateway().await;
        let request = seal(&ops(), "say ping", false);
        let (_, body) = gateway.send(&request, client_peer(1)).await;

        // Server nonce and timestamp never equal the client's, so a reflected
        // reply can't collide with the original request's key.
        assert_ne!(body["nonce"], request.nonce.as_str());
        assert_ne!(body["timestamp"], request.timestamp);

        let reflected = serde_json::json!({
            "user": body["user"],
            "nonce": body["nonce"],
            "timestamp": body["timestamp"],
            "command": body["response"],
        });
        let (status, _) = gateway
            .post(serde_json::to_vec(&reflected).unwrap(), client_peer(1))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        gateway.shutdown().await;
    }
}
