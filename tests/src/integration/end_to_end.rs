//! # End-to-End Command Flows
//!
//! Sealed request in, sealed response out, with the real execution host in
//! between.

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use recon_gateway::adapters::ActorProfile;
    use recon_gateway::{ClientCredentials, Credential};

    use crate::support::{client_peer, open, seal, test_config, TestGateway};

    fn ops() -> ClientCredentials {
        ClientCredentials::new("ops", "hunter2")
    }

    // =========================================================================
    // CONSOLE ROUND TRIP
    // =========================================================================

    #[tokio::test]
    async fn test_console_round_trip() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let request = seal(&ops(), "say hello world", false);
        let (status, body) = gateway.send(&request, client_peer(1)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "ops");
        assert_eq!(body["success"], true);
        assert!(body.get("error").is_none());

        // Reply is sealed under fresh server values
        assert_ne!(body["nonce"], request.nonce.as_str());
        assert_ne!(body["timestamp"], request.timestamp);

        let reply = open(&ops(), &body);
        assert_eq!(reply.rich_text, "§ehello world");
        assert_eq!(reply.plain_text, "hello world");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_command_reports_error() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let reply = gateway.run(&ops(), "fail", false).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("command returned failure"));

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_trailing_output_within_grace() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let reply = gateway.run(&ops(), "late afterwards", false).await;
        assert!(reply.success);
        assert_eq!(reply.plain_text, "afterwards");

        gateway.shutdown().await;
    }

    // =========================================================================
    // ACTOR EXECUTION
    // =========================================================================

    #[tokio::test]
    async fn test_actor_privileges_scoped_to_call() {
        let credential = Credential::new("builder", "pw")
            .with_target("Steve")
            .elevated()
            .with_grant("build.fly");
        let gateway = TestGateway::new(vec![credential]).await;
        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();

        let creds = ClientCredentials::new("builder", "pw");
        let reply = gateway.run(&creds, "whoami", false).await;
        assert!(reply.success);
        assert_eq!(reply.plain_text, "Steve elevated=true perms=build.fly");

        let snapshot = gateway.host.actor_snapshot("Steve").await.unwrap();
        assert!(!snapshot.elevated);
        assert!(snapshot.grants.is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_already_elevated_actor_stays_elevated() {
        let credential = Credential::new("builder", "pw").with_target("Alex").elevated();
        let gateway = TestGateway::new(vec![credential]).await;
        gateway
            .host
            .join_actor(ActorProfile::new("Alex").elevated())
            .unwrap();

        let creds = ClientCredentials::new("builder", "pw");
        assert!(gateway.run(&creds, "whoami", false).await.success);

        let snapshot = gateway.host.actor_snapshot("Alex").await.unwrap();
        assert!(snapshot.elevated);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_actor_without_queue() {
        let credential = Credential::new("builder", "pw").with_target("Steve");
        let gateway = TestGateway::new(vec![credential]).await;

        let creds = ClientCredentials::new("builder", "pw");
        let reply = gateway.run(&creds, "say hi", true).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("actor offline"));
        assert_eq!(gateway.queue.total_pending(), 0);

        gateway.shutdown().await;
    }

    // =========================================================================
    // FAILURE CONTAINMENT
    // =========================================================================

    #[tokio::test]
    async fn test_hung_command_times_out() {
        let mut config = test_config();
        config.execution.deadline = Duration::from_millis(400);
        let gateway = TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await;

        let started = Instant::now();
        let reply = gateway.run(&ops(), "hang", false).await;
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("internal timeout"));

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_command_is_contained() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let reply = gateway.run(&ops(), "boom", false).await;
        assert!(!reply.success);

        // Console owner keeps running
        let reply = gateway.run(&ops(), "say still here", false).await;
        assert!(reply.success);
        assert_eq!(reply.plain_text, "still here");

        gateway.shutdown().await;
    }

    // =========================================================================
    // HTTP SURFACE
    // =========================================================================

    #[tokio::test]
    async fn test_wrong_method_and_path() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let (status, body) = gateway
            .call(Request::get("/").body(Body::empty()).unwrap(), client_peer(1))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "only POST is accepted");

        let request = Request::post("/api/command").body(Body::from("{}")).unwrap();
        let (status, body) = gateway.call(request, client_peer(1)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "only the root path is served");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_not_found_does_not_spend_rate_budget() {
        let mut config = test_config();
        config.rate_limit.requests_per_minute = 1;
        let gateway = TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await;

        for _ in 0..3 {
            let (status, _) = gateway
                .call(Request::get("/").body(Body::empty()).unwrap(), client_peer(1))
                .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        let reply = gateway.run(&ops(), "say ok", false).await;
        assert!(reply.success);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let gateway = TestGateway::new(vec![Credential::new("ops", "hunter2")]).await;

        let (status, body) = gateway.post("not json", client_peer(1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid json");

        let (status, body) = gateway
            .post(r#"{"user":"ops","nonce":"n"}"#, client_peer(1))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing required fields");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let mut credentials = Vec::new();
        for i in 0..8 {
            let actor = format!("Actor{i}");
            credentials.push(Credential::new(format!("user{i}"), "pw").with_target(actor));
        }
        let gateway = TestGateway::new(credentials).await;
        for i in 0..8 {
            gateway
                .host
                .join_actor(ActorProfile::new(format!("Actor{i}")))
                .unwrap();
        }

        let replies = futures::future::join_all((0..8).map(|i| {
            let gateway = &gateway;
            async move {
                let creds = ClientCredentials::new(format!("user{i}"), "pw");
                (i, gateway.run(&creds, &format!("say from {i}"), false).await)
            }
        }))
        .await;

        for (i, reply) in replies {
            assert!(reply.success);
            assert_eq!(reply.plain_text, format!("from {i}"));
        }

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_console_requests_see_only_their_output() {
        let credentials = (0..8)
            .map(|i| Credential::new(format!("console{i}"), "pw"))
            .collect();
        let gateway = TestGateway::new(credentials).await;

        // Every capture overlaps the others' grace windows on the one console
        let replies = futures::future::join_all((0..8).map(|i| {
            let gateway = &gateway;
            async move {
                let creds = ClientCredentials::new(format!("console{i}"), "pw");
                let command = if i % 2 == 0 {
                    format!("say secret-{i}")
                } else {
                    format!("late secret-{i}")
                };
                (i, gateway.run(&creds, &command, false).await)
            }
        }))
        .await;

        for (i, reply) in replies {
            assert!(reply.success);
            assert_eq!(reply.plain_text, format!("secret-{i}"));
        }

        gateway.shutdown().await;
    }
}
