#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use health::ProcessHealth;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use health_supervisor::app::{Application, NoopApplication};
use health_supervisor::config::{Config, EnvMsDuration, NonEmptyString};
use health_supervisor::error::LaunchError;
use health_supervisor::server::serve;

pub fn default_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        service_name: NonEmptyString("token-monitor".to_string()),
        grace_period: EnvMsDuration(Duration::ZERO),
        app_command: None,
        export_prometheus: false,
        debug: false,
    }
}

pub fn with_grace_period(grace_period: Duration) -> Config {
    Config {
        grace_period: EnvMsDuration(grace_period),
        ..default_config()
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        Self::for_app(config, Box::new(NoopApplication)).await
    }

    pub async fn for_app(config: Config, app: Box<dyn Application>) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let health = Arc::new(ProcessHealth::new());

        tokio::spawn(async move {
            serve(config, health, app, listener, async move {
                notify.notified().await
            })
            .await
        });
        ServerHandle { addr, shutdown }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap()
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        self.get(path)
            .await
            .json::<Value>()
            .await
            .expect("response is not json")
    }

    /// Poll `/status` until the launcher reports `state`, or fail after a few seconds.
    pub async fn wait_for_launcher(&self, state: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = self.get_json("/status").await;
            if status["launcher"] == state {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "launcher never reached {}, last status: {}",
                state,
                status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// Application whose `run` returns an error right away.
pub struct FailingApplication;

impl Application for FailingApplication {
    fn name(&self) -> &str {
        "failing"
    }

    fn run(&mut self) -> Result<(), LaunchError> {
        Err(LaunchError::Failed("connection refused".to_string()))
    }
}

/// Application whose `run` panics.
pub struct PanickingApplication;

impl Application for PanickingApplication {
    fn name(&self) -> &str {
        "panicking"
    }

    fn run(&mut self) -> Result<(), LaunchError> {
        panic!("missing module")
    }
}

/// Application that blocks its thread for a long time, like a service loop.
pub struct BlockingApplication(pub Duration);

impl Application for BlockingApplication {
    fn name(&self) -> &str {
        "blocking"
    }

    fn run(&mut self) -> Result<(), LaunchError> {
        std::thread::sleep(self.0);
        Ok(())
    }
}
