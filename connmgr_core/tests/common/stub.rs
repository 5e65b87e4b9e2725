//! Deterministic **stand-ins for the external `ssh` / `ssh-keygen` tools**.
//!
//! Each stub is a tiny shell script written into a temp dir and injected via
//! the component's `program` knob. This lets integration tests exercise the
//! real spawn/liveness/registry machinery without a network or a real SSH
//! server.

#![allow(dead_code)] // not every test binary uses every stub

use std::fs;
use std::path::{Path, PathBuf};

/// Writes an executable shell script `name` into `dir` and returns its path.
#[cfg(unix)]
pub fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod stub script");
    path
}

/// An `ssh-keygen` stand-in: honors `-f <path>`, writes unique key material
/// (nanosecond timestamps) so forced regeneration is observable.
#[cfg(unix)]
pub fn stub_keygen(dir: &Path) -> PathBuf {
    write_stub(
        dir,
        "ssh-keygen",
        r#"out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-f" ]; then out="$a"; fi
  prev="$a"
done
[ -n "$out" ] || exit 1
printf 'STUB PRIVATE KEY %s\n' "$(date +%s%N)" > "$out"
printf 'ssh-ed25519 AAAASTUB%s connmgr-stub\n' "$(date +%s%N)" > "$out.pub""#,
    )
}

/// An `ssh` stand-in that stays alive like a healthy tunnel.
#[cfg(unix)]
pub fn stub_ssh_alive(dir: &Path) -> PathBuf {
    write_stub(dir, "ssh", "exec sleep 30")
}

pub fn init_test_logging() {
    //   Logs will appear only when you run with `-- --nocapture`
    //   or when the test fails.
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}
