//! Run the compiled supervisor binary, the way the platform does.
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn supervisor(port: u16) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_health-supervisor"));
    command
        .env("PORT", port.to_string())
        .env("BIND_HOST", "127.0.0.1")
        .env("EXPORT_PROMETHEUS", "false")
        .env_remove("APP_COMMAND")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

/// Kills the child when the test ends, pass or fail.
struct Supervised(Child);

impl Drop for Supervised {
    fn drop(&mut self) {
        if let Err(e) = self.0.kill() {
            eprintln!("failed to kill supervisor: {}", e);
        }
        if let Err(e) = self.0.wait() {
            eprintln!("failed to reap supervisor: {}", e);
        }
    }
}

async fn poll_health(port: u16, within: Duration) -> Option<reqwest::Response> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if let Ok(res) = client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
        {
            return Some(res);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

#[test]
fn it_exits_non_zero_when_the_port_is_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let mut child = supervisor(port).spawn().unwrap();
    let status = wait_with_timeout(&mut child, Duration::from_secs(2));
    if status.is_none() {
        drop(Supervised(child));
        panic!("supervisor kept running on a taken port");
    }

    assert!(!status.unwrap().success());
    // The dummy listener was never disturbed.
    assert_eq!(taken.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn it_serves_health_within_a_second() -> Result<()> {
    let port = free_port();
    let _child = Supervised(supervisor(port).env("GRACE_PERIOD_MS", "60000").spawn()?);

    let res = poll_health(port, Duration::from_secs(1))
        .await
        .expect("health endpoint not reachable within a second");
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(res.json::<Value>().await?["status"], "healthy");

    let client = reqwest::Client::new();
    let res = client
        .get(format!("http://127.0.0.1:{}/unknown", port))
        .send()
        .await?;
    assert_eq!(StatusCode::NOT_FOUND, res.status());

    Ok(())
}

#[tokio::test]
async fn it_survives_an_application_that_cannot_start() -> Result<()> {
    let port = free_port();
    let _child = Supervised(
        supervisor(port)
            .env("GRACE_PERIOD_MS", "100")
            .env("APP_COMMAND", "/nonexistent/token-monitor --serve")
            .spawn()?,
    );

    poll_health(port, Duration::from_secs(2))
        .await
        .expect("health endpoint not reachable");

    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = client
            .get(format!("http://127.0.0.1:{}/status", port))
            .send()
            .await?
            .json::<Value>()
            .await?;
        if status["launcher"] == "failed" {
            assert_eq!(status["application"], "/nonexistent/token-monitor --serve");
            break;
        }
        assert!(Instant::now() < deadline, "launch never failed: {}", status);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let res = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, res.status());

    Ok(())
}

#[tokio::test]
async fn it_stops_the_application_on_sigterm() -> Result<()> {
    let port = free_port();
    let mut supervised = Supervised(
        supervisor(port)
            .env("GRACE_PERIOD_MS", "100")
            .env("APP_COMMAND", "sleep 4242")
            .spawn()?,
    );

    poll_health(port, Duration::from_secs(2))
        .await
        .expect("health endpoint not reachable");

    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let app_pid = loop {
        let status = client
            .get(format!("http://127.0.0.1:{}/status", port))
            .send()
            .await?
            .json::<Value>()
            .await?;
        if let (Some("launched"), Some(pid)) =
            (status["launcher"].as_str(), status["application_pid"].as_u64())
        {
            break pid;
        }
        assert!(Instant::now() < deadline, "never launched: {}", status);
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let app_proc = PathBuf::from(format!("/proc/{}", app_pid));
    assert!(app_proc.exists());
    drop(client);

    let sent = Command::new("kill")
        .arg("-TERM")
        .arg(supervised.0.id().to_string())
        .status()?;
    assert!(sent.success());

    let status = wait_with_timeout(&mut supervised.0, Duration::from_secs(5))
        .expect("supervisor did not exit on SIGTERM");
    assert!(status.success());
    assert!(!app_proc.exists(), "application {} outlived the supervisor", app_pid);

    Ok(())
}
