#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ClientRegistry, HeartbeatService, SystemClock};
use chrono::Utc;
use domain::{ServiceStatus, SessionIdentity};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtConfig, JwtService};

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ClientRegistry>,
    pub heartbeat: Arc<HeartbeatService>,
    pub jwt_service: Arc<JwtService>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, user: &str, session: &str) -> String {
        let identity = SessionIdentity::new(user, session).expect("identity");
        self.jwt_service.generate_token(&identity).expect("token")
    }

    /// 等待注册表中的会话数达到期望值
    pub async fn wait_for_connections(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.registry.connection_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count never reached expected value");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.heartbeat.stop();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn spawn_server() -> TestServer {
    let registry = Arc::new(ClientRegistry::default());
    let clock = Arc::new(SystemClock);
    let status = ServiceStatus::new("push-server", "0.1.0-test", None, Utc::now());

    let heartbeat = Arc::new(HeartbeatService::new(
        registry.clone(),
        status.clone(),
        clock.clone(),
    ));
    heartbeat.greet_new_sessions().await;

    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret-key-32-chars-min".to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(registry.clone(), jwt_service.clone(), status, clock);
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        registry,
        heartbeat,
        jwt_service,
        shutdown: Some(shutdown_tx),
    }
}

/// 持续读取响应体，直到累计内容包含 `needle`
pub async fn read_until(response: &mut reqwest::Response, needle: &str) -> String {
    let mut received = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains(needle) {
            match response.chunk().await.expect("read chunk") {
                Some(chunk) => received.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for event");
    assert!(
        received.contains(needle),
        "stream ended before {needle:?}; got {received:?}"
    );
    received
}
