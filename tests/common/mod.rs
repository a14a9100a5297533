//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

use resilience_core::http::{router, serve};
use resilience_core::lifecycle::{Services, Shutdown};
use resilience_core::ResilienceConfig;

/// A running service on an ephemeral port.
#[allow(dead_code)]
pub struct TestService {
    pub base_url: String,
    pub services: Services,
    pub shutdown: Shutdown,
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the HTTP service with `config` on 127.0.0.1:0.
#[allow(dead_code)]
pub async fn spawn_service(config: ResilienceConfig) -> TestService {
    let services = Services::from_config(&config).unwrap();
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let app = router(services.app_state(), Duration::from_secs(5));
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = serve(listener, app, async move {
            let _ = stop.recv().await;
        })
        .await;
    });

    TestService {
        base_url: format!("http://{addr}"),
        services,
        shutdown,
    }
}

/// Client that never reuses connections, so a stopped server fails fast.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
