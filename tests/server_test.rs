//! Integration tests for the telemetry/delivery HTTP server.

#[cfg(feature = "server")]
mod server_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use attune_engine::server::{run, ServerConfig, SessionRegistry};
    use attune_engine::store::{EventStore, MemoryStore};
    use attune_engine::{ActionSuggestion, EventKind, RawEvent};

    async fn start_server(store: Arc<MemoryStore>) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let registry = SessionRegistry::new();
        let (addr, shutdown_tx) = run(ServerConfig { port: 0 }, store, registry)
            .await
            .expect("failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let store = Arc::new(MemoryStore::new());
        let (addr, shutdown_tx) = start_server(store).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_batch_ingest_records_events() {
        let store = Arc::new(MemoryStore::new());
        let (addr, shutdown_tx) = start_server(store.clone()).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/events/batch", addr))
            .header("x-user-id", "student-1")
            .json(&json!({
                "events": [
                    {"type": "click", "payload": {"tag": "BUTTON"}},
                    {"type": "answer_submit", "payload": {"correct": false, "timeToAnswer": 420}},
                    {"type": "scroll_depth", "payload": {"depth": 0.4}}
                ]
            }))
            .send()
            .await
            .expect("failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(store.event_count().await, 3);

        let users = store
            .active_users(Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(users, vec!["student-1".to_string()]);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_poll_returns_suggested_actions() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let suggestion = ActionSuggestion {
            rule_id: "offer-hint".to_string(),
            priority: 10,
            action: json!({"kind": "offer_hint"}),
        };
        let event = RawEvent::new(
            "student-1",
            EventKind::ActionSuggested,
            serde_json::to_value(&suggestion).unwrap(),
            now,
        );
        store.append(event).await.unwrap();

        // An unrelated click must not show up in the poll.
        store
            .append(RawEvent::new("student-1", EventKind::Click, json!({}), now))
            .await
            .unwrap();

        let (addr, shutdown_tx) = start_server(store).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!(
                "http://{}/api/actions/poll?user_id=student-1",
                addr
            ))
            .send()
            .await
            .expect("failed to send request");

        assert!(response.status().is_success());
        let actions: Vec<serde_json::Value> = response.json().await.expect("failed to parse JSON");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0]["event_type"], "action_suggested");
        assert_eq!(actions[0]["payload"]["rule_id"], "offer-hint");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_poll_for_unknown_user_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let (addr, shutdown_tx) = start_server(store).await;

        let client = reqwest::Client::new();
        let actions: Vec<serde_json::Value> = client
            .get(format!("http://{}/api/actions/poll?user_id=nobody", addr))
            .send()
            .await
            .expect("failed to send request")
            .json()
            .await
            .expect("failed to parse JSON");

        assert!(actions.is_empty());

        let _ = shutdown_tx.send(());
    }
}
