//! # Offline Queue Flows
//!
//! Commands accepted while their actor is offline, then replayed on the
//! actor's owner context when it joins.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use recon_gateway::adapters::ActorProfile;
    use recon_gateway::ports::{OfflineQueue, UserDirectory};
    use recon_gateway::{ClientCredentials, Credential};

    use crate::support::{eventually, test_config, Dispatched, TestGateway};

    fn builder() -> Credential {
        Credential::new("steve-bot", "pw")
            .with_target("Steve")
            .elevated()
            .with_grant("build.fly")
            .with_offline_queue()
    }

    fn creds() -> ClientCredentials {
        ClientCredentials::new("steve-bot", "pw")
    }

    fn dispatched_for(gateway: &TestGateway, actor: &str) -> Vec<Dispatched> {
        gateway
            .dispatcher
            .log()
            .into_iter()
            .filter(|d| d.sender == actor)
            .collect()
    }

    #[tokio::test]
    async fn test_queued_commands_replay_in_order_on_join() {
        let gateway = TestGateway::new(vec![builder()]).await;

        for command in ["say one", "say two", "whoami"] {
            let reply = gateway.run(&creds(), command, true).await;
            assert!(reply.success);
            assert_eq!(reply.plain_text, "queued");
        }
        assert_eq!(gateway.queue.pending_for("Steve").len(), 3);

        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();
        assert!(eventually(|| dispatched_for(&gateway, "Steve").len() == 3).await);

        let replayed = dispatched_for(&gateway, "Steve");
        let commands: Vec<&str> = replayed.iter().map(|d| d.command.as_str()).collect();
        assert_eq!(commands, ["say one", "say two", "whoami"]);
        for entry in &replayed {
            assert!(entry.elevated);
            assert_eq!(entry.permissions, vec!["build.fly".to_string()]);
        }

        assert!(gateway.queue.pending_for("Steve").is_empty());
        let snapshot = gateway.host.actor_snapshot("Steve").await.unwrap();
        assert!(!snapshot.elevated);
        assert!(snapshot.grants.is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_global_policy_allows_queue() {
        let mut config = test_config();
        config.execution.allow_queue_for_all_users = true;
        let plain = Credential::new("alex-bot", "pw").with_target("Alex");
        let gateway = TestGateway::with_config(config, vec![plain]).await;

        let reply = gateway
            .run(&ClientCredentials::new("alex-bot", "pw"), "say later", true)
            .await;
        assert!(reply.success);
        assert_eq!(gateway.queue.pending_for("Alex").len(), 1);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_flag_required() {
        let gateway = TestGateway::new(vec![builder()]).await;

        let reply = gateway.run(&creds(), "say now", false).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("actor offline"));
        assert_eq!(gateway.queue.total_pending(), 0);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_entries_never_delivered() {
        let gateway = TestGateway::new(vec![builder()]).await;

        gateway
            .queue
            .enqueue("Steve", "say stale", "steve-bot")
            .await
            .unwrap();
        gateway.queue_clock.advance(Duration::from_secs(73 * 3600));

        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();
        assert!(eventually(|| gateway.queue.total_pending() == 0).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(dispatched_for(&gateway, "Steve").is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_removed_requester_runs_without_privileges() {
        let gateway = TestGateway::new(vec![builder()]).await;

        gateway.run(&creds(), "whoami", true).await;
        assert!(gateway.directory.remove("steve-bot").await.unwrap());

        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();
        assert!(eventually(|| dispatched_for(&gateway, "Steve").len() == 1).await);

        let replayed = dispatched_for(&gateway, "Steve");
        assert!(!replayed[0].elevated);
        assert!(replayed[0].permissions.is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejoin_delivers_only_new_entries() {
        let gateway = TestGateway::new(vec![builder()]).await;

        gateway.run(&creds(), "say first", true).await;
        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();
        assert!(eventually(|| dispatched_for(&gateway, "Steve").len() == 1).await);

        assert!(gateway.host.leave_actor("Steve"));
        gateway.run(&creds(), "say second", true).await;
        gateway.host.join_actor(ActorProfile::new("Steve")).unwrap();
        assert!(eventually(|| dispatched_for(&gateway, "Steve").len() == 2).await);

        let commands: Vec<String> = dispatched_for(&gateway, "Steve")
            .into_iter()
            .map(|d| d.command)
            .collect();
        assert_eq!(commands, ["say first", "say second"]);

        gateway.shutdown().await;
    }
}
