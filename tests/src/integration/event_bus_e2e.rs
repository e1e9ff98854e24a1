//! # Event Bus End-to-End
//!
//! A real host on `127.0.0.1:0` with the event bus mounted on `/ws`, and
//! real [`EventBusClient`]s connecting through the websocket middleware.
//!
//! ```text
//! client A ──UpdateList[chat.message]──►┐
//! client B ──Emit(Chat.Message)────────►├─ host /ws ─► EventBusServer
//! HTTP POST /api/chat/send ────────────►┘                 │
//!                                        ◄── relay to A ──┘
//! ```

#[cfg(test)]
mod tests {
    use host_runtime::chat::{chat_api, CHAT_MESSAGE};
    use host_runtime::{Host, HostConfig};
    use ks_03_connections::{ConnectionRegistry, ConnectionState};
    use ks_04_event_bus::{EventBusClient, EventBusClientConfig, EventBusServer};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const WAIT: Duration = Duration::from_secs(5);

    struct RunningHost {
        addr: SocketAddr,
        bus: Arc<EventBusServer>,
        registry: Arc<ConnectionRegistry>,
        stop: Option<oneshot::Sender<()>>,
        server: JoinHandle<anyhow::Result<()>>,
    }

    impl RunningHost {
        async fn start() -> Self {
            let mut config = HostConfig::default();
            config.static_files.enabled = false;

            let host = Host::builder(config)
                .with_middleware(chat_api())
                .build()
                .unwrap();
            let bus = Arc::clone(host.event_bus());
            let registry = Arc::clone(host.registry());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (stop, stop_rx) = oneshot::channel::<()>();
            let server = tokio::spawn(host.serve_with_shutdown(listener, async move {
                let _ = stop_rx.await;
            }));

            Self {
                addr,
                bus,
                registry,
                stop: Some(stop),
                server,
            }
        }

        fn client(&self) -> EventBusClient {
            // Long interval: the first dial is immediate, reconnects stay out
            // of the way of the assertions.
            EventBusClient::spawn(
                EventBusClientConfig::new(format!("ws://{}/ws", self.addr))
                    .with_reconnect_interval(Duration::from_secs(60)),
            )
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            timeout(WAIT, self.server).await.unwrap().unwrap().unwrap();
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let reached = timeout(WAIT, async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for {what}");
    }

    async fn open(client: &EventBusClient) {
        let opened = timeout(WAIT, client.wait_for_state(ConnectionState::Open)).await;
        assert!(matches!(opened, Ok(true)), "client never opened");
    }

    fn collector(client: &EventBusClient, action: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(action, move |data| {
            let _ = tx.send(data);
        });
        rx
    }

    async fn post(addr: SocketAddr, path: &str, body: &Value) -> String {
        let body = body.to_string();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    // =============================================================================
    // TESTS
    // =============================================================================

    #[tokio::test]
    async fn test_emit_is_relayed_only_to_subscribers() {
        let host = RunningHost::start().await;
        let a = host.client();
        let b = host.client();
        let mut a_events = collector(&a, CHAT_MESSAGE);
        let mut b_events = collector(&b, "presence.join");

        open(&a).await;
        open(&b).await;
        eventually("both subscriptions", || {
            host.bus.subscriber_count(CHAT_MESSAGE) == 1
                && host.bus.subscriber_count("presence.join") == 1
        })
        .await;

        assert!(b.emit("Chat.Message", json!({"user": "bo", "text": "hi"})));

        let received = timeout(WAIT, a_events.recv()).await.unwrap().unwrap();
        assert_eq!(received, json!({"user": "bo", "text": "hi"}));
        sleep(Duration::from_millis(50)).await;
        assert!(b_events.try_recv().is_err());

        a.shutdown().await;
        b.shutdown().await;
        host.stop().await;
    }

    #[tokio::test]
    async fn test_http_api_publishes_into_bus() {
        let host = RunningHost::start().await;
        let a = host.client();
        let mut a_events = collector(&a, CHAT_MESSAGE);
        open(&a).await;
        eventually("subscription", || host.bus.subscriber_count(CHAT_MESSAGE) == 1).await;

        let response = post(
            host.addr,
            "/api/chat/send",
            &json!({"user": "ada", "text": "from http"}),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(r#"{"delivered":1}"#), "{response}");
        let received = timeout(WAIT, a_events.recv()).await.unwrap().unwrap();
        assert_eq!(received["text"], "from http");

        a.shutdown().await;
        host.stop().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let host = RunningHost::start().await;
        let a = host.client();
        let mut a_events = collector(&a, CHAT_MESSAGE);
        open(&a).await;
        eventually("subscription", || host.bus.subscriber_count(CHAT_MESSAGE) == 1).await;

        assert!(a.off(CHAT_MESSAGE));
        eventually("unsubscription", || host.bus.subscriber_count(CHAT_MESSAGE) == 0).await;

        assert_eq!(host.bus.publish(CHAT_MESSAGE, json!("ignored")), 0);
        sleep(Duration::from_millis(50)).await;
        assert!(a_events.try_recv().is_err());

        a.shutdown().await;
        host.stop().await;
    }

    #[tokio::test]
    async fn test_client_disconnect_cleans_up_server_state() {
        let host = RunningHost::start().await;
        let a = host.client();
        let _events = collector(&a, CHAT_MESSAGE);
        open(&a).await;
        eventually("registration", || host.registry.connection_count() == 1).await;

        a.shutdown().await;

        eventually("registry cleanup", || host.registry.connection_count() == 0).await;
        eventually("subscriber cleanup", || host.bus.connection_count() == 0).await;
        host.stop().await;
    }

    #[tokio::test]
    async fn test_host_shutdown_closes_clients() {
        let host = RunningHost::start().await;
        let a = host.client();
        open(&a).await;
        eventually("registration", || host.registry.connection_count() == 1).await;

        host.stop().await;

        let closed = timeout(WAIT, a.wait_for_state(ConnectionState::Closed)).await;
        assert!(matches!(closed, Ok(true)));
        assert!(!a.emit(CHAT_MESSAGE, Value::Null));
        a.shutdown().await;
    }
}
