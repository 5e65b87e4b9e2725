#![cfg(unix)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, ptr};

use connmgr_core::{
    AppContext, SshOptions, TunnelError, TunnelLaunch, TunnelRequest, TunnelState,
    TunnelSupervisor,
};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

mod common;
use common::stub::{init_test_logging, stub_ssh_alive, write_stub};

fn supervisor(ctx: &AppContext, program: &Path) -> TunnelSupervisor {
    TunnelSupervisor::new(ctx)
        .with_options(SshOptions {
            program: program.to_string_lossy().into_owned(),
            ..SshOptions::default()
        })
        .with_grace(Duration::from_millis(200))
}

fn request(name: &str, local_port: u16) -> TunnelRequest {
    TunnelRequest {
        name: name.to_string(),
        host: "10.0.0.5".to_string(),
        port: 22,
        key_path: PathBuf::from("/tmp/does-not-matter"),
        local_port,
        remote_port: 11434,
    }
}

/// A port nothing is listening on right now.
fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

fn pid_file(ctx: &AppContext, name: &str) -> PathBuf {
    ctx.pid_dir.join(format!("{name}.pid"))
}

/// A terminated detached child stays a zombie of this test process until
/// the runtime reaps it, so poll (reaping along the way) rather than
/// asserting immediately.
async fn wait_for_absent(sup: &TunnelSupervisor, name: &str, pid: i32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        // SAFETY: non-blocking reap of our own child; ECHILD just means the
        // runtime got there first.
        unsafe {
            libc::waitpid(pid as libc::pid_t, ptr::null_mut(), libc::WNOHANG);
        }
        match sup.state(name).expect("state check") {
            TunnelState::Absent => return,
            TunnelState::Active { .. } if Instant::now() < deadline => {
                sleep(Duration::from_millis(50)).await;
            }
            state => panic!("tunnel '{name}' still {state:?} after stop"),
        }
    }
}

#[tokio::test]
async fn daemon_lifecycle_start_status_stop() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    let launch = sup
        .start(request("gpu1", free_port()), true)
        .await
        .expect("start should succeed against a live stub");
    let handle = match launch {
        TunnelLaunch::Detached(h) => h,
        TunnelLaunch::Foreground(_) => panic!("daemonized start must detach"),
    };

    // PID registry holds a live process.
    let recorded: i32 = fs::read_to_string(pid_file(&ctx, "gpu1"))
        .expect("PID file must exist after a daemonized start")
        .trim()
        .parse()
        .expect("PID file holds a decimal PID");
    assert_eq!(recorded, handle.pid);

    let status = sup.status(Some("gpu1")).unwrap();
    assert_eq!(status, vec![("gpu1".to_string(), TunnelState::Active { pid: handle.pid })]);

    // Unnamed status scans the registry.
    let all = sup.status(None).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "gpu1");

    sup.stop("gpu1").expect("stop should succeed");
    assert!(!pid_file(&ctx, "gpu1").exists(), "stop must remove the PID file");
    wait_for_absent(&sup, "gpu1", handle.pid).await;
}

#[tokio::test]
async fn duplicate_start_fails_without_spawning() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    let first = match sup.start(request("gpu1", free_port()), true).await.unwrap() {
        TunnelLaunch::Detached(h) => h,
        _ => unreachable!(),
    };

    let err = sup
        .start(request("gpu1", free_port()), true)
        .await
        .expect_err("second start for a live name must fail");
    match err {
        TunnelError::AlreadyRunning { name, pid } => {
            assert_eq!(name, "gpu1");
            assert_eq!(pid, first.pid, "the error reports the live PID, untouched");
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    sup.stop("gpu1").unwrap();
    wait_for_absent(&sup, "gpu1", first.pid).await;
}

#[tokio::test]
async fn bound_local_port_fails_before_spawn() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let taken = listener.local_addr().unwrap().port();

    let err = sup
        .start(request("gpu1", taken), true)
        .await
        .expect_err("bound port must fail the preflight");
    assert!(matches!(err, TunnelError::PortInUse(p) if p == taken), "got {err:?}");
    assert!(!pid_file(&ctx, "gpu1").exists());
}

#[tokio::test]
async fn early_exit_within_grace_is_a_setup_error_with_diagnostics() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let failing = write_stub(
        dir.path(),
        "ssh",
        r#"echo "bind [127.0.0.1]:11434: Address already in use" >&2; exit 255"#,
    );
    let sup = supervisor(&ctx, &failing);

    let err = sup
        .start(request("gpu1", free_port()), true)
        .await
        .expect_err("a dead tunnel must not be reported as success");
    match err {
        TunnelError::TunnelSetup { name, detail } => {
            assert_eq!(name, "gpu1");
            assert!(
                detail.contains("Address already in use"),
                "setup error must carry the client's diagnostics, got: {detail}"
            );
        }
        other => panic!("expected TunnelSetup, got {other:?}"),
    }
    assert!(
        !pid_file(&ctx, "gpu1").exists(),
        "no registry entry may be created for a dead tunnel"
    );
}

#[tokio::test]
async fn stale_pid_file_self_heals_to_absent() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    // Beyond pid_max on Linux, so guaranteed dead.
    fs::write(pid_file(&ctx, "gpu1"), "99999999").unwrap();

    let status = sup.status(Some("gpu1")).unwrap();
    assert_eq!(status, vec![("gpu1".to_string(), TunnelState::Absent)]);
    assert!(
        !pid_file(&ctx, "gpu1").exists(),
        "the stale check must reap the dead PID file"
    );
}

#[tokio::test]
async fn stale_entry_does_not_block_a_new_start() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    fs::write(pid_file(&ctx, "gpu1"), "99999999").unwrap();

    let handle = match sup.start(request("gpu1", free_port()), true).await.unwrap() {
        TunnelLaunch::Detached(h) => h,
        _ => unreachable!(),
    };
    sup.stop("gpu1").unwrap();
    wait_for_absent(&sup, "gpu1", handle.pid).await;
}

#[tokio::test]
async fn stop_when_not_running_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    let outcome = sup.stop("gpu1").expect("stop on absent name succeeds");
    assert_eq!(outcome, connmgr_core::StopOutcome::NotRunning);
}

#[tokio::test]
async fn unparsable_pid_file_reads_as_absent() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let sup = supervisor(&ctx, &stub_ssh_alive(dir.path()));

    fs::write(pid_file(&ctx, "gpu1"), "not-a-pid").unwrap();
    assert_eq!(sup.state("gpu1").unwrap(), TunnelState::Absent);
    assert!(!pid_file(&ctx, "gpu1").exists());
}

#[tokio::test]
async fn foreground_tunnel_waits_and_leaves_no_registry_entry() {
    let dir = TempDir::new().unwrap();
    let ctx = AppContext::at(dir.path()).unwrap();
    let short_lived = write_stub(dir.path(), "ssh", "exec sleep 1");
    let sup = supervisor(&ctx, &short_lived);

    let tunnel = match sup.start(request("gpu1", free_port()), false).await.unwrap() {
        TunnelLaunch::Foreground(t) => t,
        TunnelLaunch::Detached(_) => panic!("foreground start must not detach"),
    };
    assert!(
        !pid_file(&ctx, "gpu1").exists(),
        "foreground tunnels are owned by the invocation, not the registry"
    );

    tunnel.wait().await.expect("wait until the stub exits");
    assert_eq!(sup.state("gpu1").unwrap(), TunnelState::Absent);
}
