//! Runs the real binary: a master with worker processes.

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::TcpStream;
use tokio::process::Command;

mod common;

use common::{round_trip, start_stub_upstream, OK_RESPONSE};

async fn free_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn wait_until_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("proxy never started listening on {}", addr);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_master_and_workers_serve_and_shut_down() {
    let upstream = start_stub_upstream(OK_RESPONSE).await;
    let run_dir = tempfile::tempdir().unwrap();
    let listen = free_port().await;

    let mut master = Command::new(env!("CARGO_BIN_EXE_prefork-proxy"))
        .arg("master")
        .arg("--listen")
        .arg(listen.to_string())
        .arg("--workers")
        .arg("3")
        .arg("--upstream")
        .arg(upstream.url())
        .arg("--run-dir")
        .arg(run_dir.path())
        .arg("--log-level")
        .arg("warn")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    wait_until_listening(listen).await;
    for id in 1..=3 {
        assert!(run_dir.path().join(format!("worker-{}.sock", id)).exists());
    }

    for _ in 0..6 {
        let response = round_trip(listen, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert_eq!(response, OK_RESPONSE);
    }
    // The readiness check connection above was handed off too and closed without a request.
    assert_eq!(upstream.requests(), 6);

    let pid = Pid::from_raw(master.id().unwrap() as i32);
    kill(pid, Signal::SIGTERM).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(15), master.wait())
        .await
        .expect("master did not exit after SIGTERM")
        .unwrap();
    assert!(status.success());

    for id in 1..=3 {
        assert!(!run_dir.path().join(format!("worker-{}.sock", id)).exists());
    }
    assert!(!run_dir.path().join("proxy.toml").exists());
}

#[tokio::test]
async fn test_invalid_config_rejected_before_start() {
    let output = Command::new(env!("CARGO_BIN_EXE_prefork-proxy"))
        .arg("master")
        .arg("--workers")
        .arg("0")
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NoWorkers"), "stderr: {}", stderr);
}
