#![cfg(unix)]

//! End-to-end pass over one connection: provision the key, start the
//! tunnel, observe it, tear it down.

use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, ptr};

use connmgr_core::{
    AppContext, ConnectionRecord, ConnectionStore, KeyProvisioner, SshOptions, TunnelLaunch,
    TunnelRequest, TunnelState, TunnelSupervisor,
};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

mod common;
use common::stub::{init_test_logging, stub_keygen, stub_ssh_alive};

#[tokio::test]
async fn gpu1_connection_full_lifecycle() -> anyhow::Result<()> {
    init_test_logging();
    let dir = TempDir::new()?;
    let ctx = AppContext::at(dir.path())?;

    // Configured.
    let store = ConnectionStore::open(ctx.config_file.clone())?;
    store.save(&ConnectionRecord::new("gpu1", "10.0.0.5", 22))?;
    let record = store.get("gpu1")?.expect("record exists");

    // Key provisioned, at the deterministic paths with the right bits.
    let keys = KeyProvisioner::new(ctx.keys_dir.clone())
        .with_program(stub_keygen(dir.path()).to_string_lossy().into_owned());
    let pair = keys.ensure_key("gpu1", false).await?;
    assert_eq!(pair.private_key, ctx.keys_dir.join("gpu1"));
    assert_eq!(pair.public_key, ctx.keys_dir.join("gpu1.pub"));
    assert_eq!(fs::metadata(&pair.private_key)?.permissions().mode() & 0o777, 0o600);
    assert_eq!(fs::metadata(&pair.public_key)?.permissions().mode() & 0o777, 0o644);

    // Tunnel active.
    let sup = TunnelSupervisor::new(&ctx)
        .with_options(SshOptions {
            program: stub_ssh_alive(dir.path()).to_string_lossy().into_owned(),
            ..SshOptions::default()
        })
        .with_grace(Duration::from_millis(200));
    let local_port = TcpListener::bind(("127.0.0.1", 0))?.local_addr()?.port();
    let handle = match sup
        .start(
            TunnelRequest {
                name: record.name.clone(),
                host: record.host,
                port: record.port,
                key_path: pair.private_key,
                local_port,
                remote_port: 11434,
            },
            true,
        )
        .await?
    {
        TunnelLaunch::Detached(h) => h,
        TunnelLaunch::Foreground(_) => panic!("daemonized start must detach"),
    };
    assert_eq!(
        sup.status(Some("gpu1"))?,
        vec![("gpu1".to_string(), TunnelState::Active { pid: handle.pid })]
    );

    // Stopped.
    sup.stop("gpu1")?;
    assert!(!ctx.pid_dir.join("gpu1.pid").exists());
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        // SAFETY: non-blocking reap of our own child.
        unsafe {
            libc::waitpid(handle.pid as libc::pid_t, ptr::null_mut(), libc::WNOHANG);
        }
        match sup.state("gpu1")? {
            TunnelState::Absent => break,
            _ if Instant::now() < deadline => sleep(Duration::from_millis(50)).await,
            state => panic!("still {state:?} after stop"),
        }
    }
    Ok(())
}
