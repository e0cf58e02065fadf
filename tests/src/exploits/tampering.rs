//! # Envelope Tampering
//!
//! An attacker without the secret modifies a captured envelope or crafts one
//! from scratch.

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use recon_crypto::{derive_key, encrypt, IV_LEN};
    use recon_gateway::client::random_nonce;
    use recon_gateway::{ClientCredentials, CommandRequest, Credential};

    use crate::support::{client_peer, seal, test_config, unix_now, TestGateway};

    fn ops() -> ClientCredentials {
        ClientCredentials::new("ops", "hunter2")
    }

    async fn gateway() -> TestGateway {
        TestGateway::new(vec![
            Credential::new("ops", "hunter2"),
            Credential::new("admin", "root-secret"),
        ])
        .await
    }

    fn with_envelope(mut request: CommandRequest, edit: impl FnOnce(&mut Vec<u8>)) -> CommandRequest {
        let mut raw = STANDARD.decode(&request.command).unwrap();
        edit(&mut raw);
        request.command = STANDARD.encode(raw);
        request
    }

    #[tokio::test]
    async fn test_iv_bit_flip_breaks_prefix() {
        let gateway = gateway().await;

        let tampered = with_envelope(seal(&ops(), "say safe", false), |raw| raw[0] ^= 0x01);
        let (status, body) = gateway.send(&tampered, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid command format");
        assert!(gateway.dispatcher.log().is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_ciphertext_bit_flip_rejected() {
        let gateway = gateway().await;

        let tampered = with_envelope(seal(&ops(), "say safe", false), |raw| {
            let last = raw.len() - 1;
            raw[last] ^= 0x80;
        });
        let (status, _) = gateway.send(&tampered, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(gateway.dispatcher.log().is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_truncated_envelopes_rejected() {
        let gateway = gateway().await;

        let partial_block = with_envelope(seal(&ops(), "say safe", false), |raw| {
            raw.truncate(raw.len() - 4)
        });
        let (status, body) = gateway.send(&partial_block, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "decryption failed");

        let iv_only = with_envelope(seal(&ops(), "say safe", false), |raw| raw.truncate(IV_LEN));
        let (status, body) = gateway.send(&iv_only, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "decryption failed");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_base64_envelope_rejected() {
        let gateway = gateway().await;

        let mut request = seal(&ops(), "say safe", false);
        request.command = "%%% not base64 %%%".to_string();
        let (status, body) = gateway.send(&request, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "decryption failed");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_identity_swap_rejected() {
        let gateway = gateway().await;

        // Sealed with the ops secret, presented as admin
        let mut request = seal(&ops(), "say promote me", false);
        request.user = "admin".to_string();
        let (status, _) = gateway.send(&request, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(gateway.dispatcher.log().is_empty());

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_protocol_tag_rejected() {
        let gateway = gateway().await;

        let nonce = random_nonce();
        let timestamp = unix_now();
        let key = derive_key("hunter2", &nonce, timestamp);
        let request = CommandRequest {
            user: "ops".to_string(),
            nonce,
            timestamp,
            queue: false,
            command: encrypt("say untagged", &key).unwrap(),
        };

        let (status, body) = gateway.send(&request, client_peer(1)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid command format");

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = test_config();
        config.http.max_body_bytes = 1024;
        let gateway = TestGateway::with_config(config, vec![Credential::new("ops", "hunter2")]).await;

        let padded = format!(
            r#"{{"user":"ops","nonce":"n","timestamp":1,"command":"{}"}}"#,
            "A".repeat(4096)
        );
        let (status, body) = gateway.post(padded, client_peer(1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unreadable request body");

        gateway.shutdown().await;
    }
}
