//! Wire-level tests: a real server on a loopback port driven by the
//! blocking client.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use burrow_common::config::BurrowConfig;
use burrow_common::types::TaskStatus;
use burrow_core::shim::{CapabilityShim, ChrootShim};
use burrow_rpc::client::RpcClient;
use burrow_rpc::protocol::{ExecParams, TaskSnapshot};
use burrow_rpc::server::{self, RpcServer};
use burrow_runtime::engine::{Engine, RunOptions};
use burrow_runtime::launcher::Launcher;

async fn start(server: RpcServer) -> RpcClient {
    let listener = server::bind("127.0.0.1", 0).await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let _ = tokio::spawn(Arc::new(server).serve(listener));
    RpcClient::new("127.0.0.1", port)
}

/// Runs a blocking client call off the async runtime.
async fn blocking<T, F>(client: &RpcClient, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&RpcClient) -> T + Send + 'static,
{
    let client = client.clone();
    tokio::task::spawn_blocking(move || call(&client))
        .await
        .expect("join")
}

async fn finished(client: &RpcClient, pid: i32) -> TaskSnapshot {
    for _ in 0..200 {
        let snap = blocking(client, move |c| c.status(pid)).await.expect("status");
        if snap.exit_code.is_some() {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    blocking(client, move |c| c.status(pid)).await.expect("status")
}

#[tokio::test(flavor = "multi_thread")]
async fn exec_query_and_status_over_the_wire() {
    let client = start(RpcServer::new()).await;
    let pid = blocking(&client, |c| {
        c.exec(&ExecParams {
            cmd: "echo".into(),
            args: vec!["hello".into()],
            ..ExecParams::default()
        })
    })
    .await
    .expect("exec");

    let listed = blocking(&client, RpcClient::query).await.expect("query");
    assert_eq!(listed.get(&pid).map(String::as_str), Some("echo hello"));

    let snap = finished(&client, pid).await;
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.exit_code, Some(0));
    assert_eq!(snap.stdout, "hello\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_unknown_pid_is_not_found_over_the_wire() {
    let client = start(RpcServer::new()).await;
    let err = blocking(&client, |c| c.kill(i32::MAX)).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
    let listed = blocking(&client, RpcClient::query).await.expect("query");
    assert!(listed.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_outlives_the_caller_connection() {
    let client = start(RpcServer::new()).await;
    let pid = blocking(&client, |c| {
        c.exec(&ExecParams {
            cmd: "sleep".into(),
            args: vec!["30".into()],
            timeout: Some(1),
            container: None,
        })
    })
    .await
    .expect("exec");

    let snap = finished(&client, pid).await;
    assert_eq!(snap.status, TaskStatus::TimedOut);
    assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err());
}

#[test]
fn unreachable_server_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    let err = RpcClient::new("127.0.0.1", port).query().unwrap_err();
    assert_eq!(err.kind(), "external_service_unavailable");
}

fn container_engine(dir: &Path) -> (Engine, Launcher, String) {
    let engine = Engine::open(BurrowConfig::with_data_dir(dir.join("data"))).expect("engine");
    let src = dir.join("src");
    fs::create_dir_all(src.join("rootfs/etc")).expect("mkdir");
    fs::write(src.join("rootfs/etc/hostname"), "inside\n").expect("write");
    fs::write(src.join("setting.yml"), "rootfs: rootfs\n").expect("write");

    let chroot = dir.join("fake-chroot");
    fs::write(&chroot, "#!/bin/sh\nshift\nexec \"$@\"\n").expect("write");
    fs::set_permissions(&chroot, fs::Permissions::from_mode(0o755)).expect("chmod");
    let shims: Vec<Box<dyn CapabilityShim>> =
        vec![Box::new(ChrootShim::new(dir.join("libfakechroot.so")))];
    let launcher = Launcher::with_shims(dir.join("sys"), chroot, shims);

    let id = engine
        .run(
            &RunOptions {
                source_dir: src,
                config_path: None,
                passive: true,
            },
            &launcher,
            None,
        )
        .expect("run")
        .record
        .id
        .to_string();
    (engine, launcher, id)
}

#[tokio::test(flavor = "multi_thread")]
async fn exec_inside_a_container_runs_in_its_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, launcher, id) = container_engine(dir.path());
    let client = start(RpcServer::new().with_containers(engine, launcher)).await;

    let pid = blocking(&client, move |c| {
        c.exec(&ExecParams {
            cmd: "/bin/sh".into(),
            args: vec!["-c".into(), "cat \"$FAKECHROOT_BASE/etc/hostname\"".into()],
            timeout: Some(30),
            container: Some(id),
        })
    })
    .await
    .expect("exec");

    let snap = finished(&client, pid).await;
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.stdout, "inside\n");

    let err = blocking(&client, |c| {
        c.exec(&ExecParams {
            cmd: "/bin/true".into(),
            container: Some("missing".into()),
            ..ExecParams::default()
        })
    })
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
