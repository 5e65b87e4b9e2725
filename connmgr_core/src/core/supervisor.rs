use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use std::{fs, io};

use log::{debug, info, warn};
use tokio::process::{Child, Command};
use tokio::signal;
use tokio::time::sleep;

use crate::core::context::AppContext;
use crate::core::errors::TunnelError;
use crate::core::process::{self, Terminate};
use crate::ssh::options::SshOptions;

/// How many bytes of the tunnel log to attach to a setup failure.
const DIAGNOSTIC_TAIL: usize = 4096;

/// What `start` needs to know about one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub key_path: PathBuf,
    pub local_port: u16,
    pub remote_port: u16,
}

/// A confirmed-live, detached tunnel, as recorded in the PID registry.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    pub name: String,
    pub pid: i32,
    pub host: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub key_path: PathBuf,
}

/// Lazily-observed state of one connection name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Absent,
    Active { pid: i32 },
}

/// Result of a successful `start`.
#[derive(Debug)]
pub enum TunnelLaunch {
    /// Daemonized; the PID registry owns the process now.
    Detached(TunnelHandle),
    /// Attached to this invocation; the caller must `wait()` on it.
    Foreground(ForegroundTunnel),
}

/// Result of a `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: i32 },
    /// The process vanished between the liveness check and the signal.
    AlreadyGone { pid: i32 },
}

/// Launches, tracks, and terminates tunnel subprocesses.
///
/// The registry is one `<name>.pid` file per connection under `pid_dir`;
/// absence of the file means "not running". Every decision that depends on
/// "is this name active" goes through [`TunnelSupervisor::state`], which
/// reaps stale PID files on the way. There is no cross-invocation locking:
/// two simultaneous `start`s can race past the check, in which case the last
/// registry writer wins — the registry itself stays consistent.
pub struct TunnelSupervisor {
    pid_dir: PathBuf,
    log_dir: PathBuf,
    options: SshOptions,
    grace: Duration,
}

impl TunnelSupervisor {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            pid_dir: ctx.pid_dir.clone(),
            log_dir: ctx.log_dir.clone(),
            options: SshOptions::default(),
            grace: Duration::from_secs(2),
        }
    }

    pub fn with_options(mut self, options: SshOptions) -> Self {
        self.options = options;
        self
    }

    /// How long to wait before declaring the subprocess live. Tests shrink it.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn pid_file(&self, name: &str) -> PathBuf {
        self.pid_dir.join(format!("{name}.pid"))
    }

    fn log_file(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }

    /// Stale-checked state for one name.
    ///
    /// A PID file whose process is dead is removed here, so callers never
    /// see a `Stale` state: it self-heals to `Absent`.
    pub fn state(&self, name: &str) -> Result<TunnelState, TunnelError> {
        let pid_file = self.pid_file(name);
        let pid = match read_pid(&pid_file)? {
            Some(pid) => pid,
            None => return Ok(TunnelState::Absent),
        };
        if process::is_alive(pid) {
            return Ok(TunnelState::Active { pid });
        }
        warn!("Removing stale PID file for '{}' (PID {} is gone)", name, pid);
        remove_if_present(&pid_file)?;
        Ok(TunnelState::Absent)
    }

    /// States for one name, or for every name in the registry.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<(String, TunnelState)>, TunnelError> {
        let names: Vec<String> = match name {
            Some(n) => vec![n.to_string()],
            None => {
                let mut names = Vec::new();
                for entry in fs::read_dir(&self.pid_dir)? {
                    let path = entry?.path();
                    if path.extension().is_some_and(|e| e == "pid") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            names.push(stem.to_string());
                        }
                    }
                }
                names.sort();
                names
            }
        };
        names
            .into_iter()
            .map(|n| self.state(&n).map(|s| (n, s)))
            .collect()
    }

    /// Starts the port-forwarding subprocess for `req`.
    ///
    /// Fails fast on a live duplicate or a bound local port, then spawns the
    /// SSH client and waits out the grace interval; a child that has already
    /// exited is reported as a setup failure carrying its captured stderr,
    /// and no registry entry is written. Only a confirmed-live daemonized
    /// tunnel reaches the registry.
    pub async fn start(
        &self,
        req: TunnelRequest,
        daemonize: bool,
    ) -> Result<TunnelLaunch, TunnelError> {
        if let TunnelState::Active { pid } = self.state(&req.name)? {
            return Err(TunnelError::AlreadyRunning {
                name: req.name,
                pid,
            });
        }

        // Bind-and-release probe. Racy against the child's own bind, but a
        // late loser exits inside the grace window and is caught below.
        if !local_port_available(req.local_port) {
            return Err(TunnelError::PortInUse(req.local_port));
        }

        let log_path = self.log_file(&req.name);
        let log_file = fs::File::create(&log_path)?;

        let mut cmd = Command::new(&self.options.program);
        cmd.arg("-i")
            .arg(&req.key_path)
            .arg("-N") // no remote command
            .args(["-o", "BatchMode=yes"])
            .args([
                "-o",
                &format!(
                    "StrictHostKeyChecking={}",
                    self.options.host_key_policy.as_option_value()
                ),
            ])
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args([
                "-L",
                &format!("{}:localhost:{}", req.local_port, req.remote_port),
            ])
            .args(["-p", &req.port.to_string()])
            .arg(format!("{}@{}", self.options.user, req.host))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file));

        if daemonize {
            detach_from_session(&mut cmd);
        }

        info!(
            "Starting tunnel '{}': localhost:{} -> {}:{}",
            req.name, req.local_port, req.host, req.remote_port
        );
        let mut child = cmd.spawn()?;

        // Grace interval: an SSH client that cannot connect or bind the
        // remote forward exits quickly thanks to ExitOnForwardFailure.
        sleep(self.grace).await;
        if let Some(status) = child.try_wait()? {
            let detail = match read_log_tail(&log_path) {
                Some(tail) if !tail.is_empty() => tail,
                _ => format!("{} exited with {}", self.options.program, status),
            };
            return Err(TunnelError::TunnelSetup {
                name: req.name,
                detail,
            });
        }

        let pid = child
            .id()
            .map(|id| id as i32)
            .ok_or_else(|| TunnelError::TunnelSetup {
                name: req.name.clone(),
                detail: "subprocess has no PID after liveness check".to_string(),
            })?;
        debug!("Tunnel '{}' confirmed live (PID {})", req.name, pid);

        let handle = TunnelHandle {
            name: req.name.clone(),
            pid,
            host: req.host,
            local_port: req.local_port,
            remote_port: req.remote_port,
            key_path: req.key_path,
        };

        if daemonize {
            write_pid(&self.pid_file(&req.name), pid)?;
            // Dropping the child leaves the detached process running; it is
            // only ever stopped through the registry.
            drop(child);
            Ok(TunnelLaunch::Detached(handle))
        } else {
            Ok(TunnelLaunch::Foreground(ForegroundTunnel {
                handle,
                child,
            }))
        }
    }

    /// Gracefully terminates the tunnel for `name`, reaping the registry
    /// entry. Stopping a name that is not running is not an error.
    pub fn stop(&self, name: &str) -> Result<StopOutcome, TunnelError> {
        let pid = match self.state(name)? {
            TunnelState::Absent => return Ok(StopOutcome::NotRunning),
            TunnelState::Active { pid } => pid,
        };
        match process::terminate(pid) {
            Ok(Terminate::Signalled) => {
                info!("Stopped tunnel '{}' (PID {})", name, pid);
                remove_if_present(&self.pid_file(name))?;
                Ok(StopOutcome::Stopped { pid })
            }
            Ok(Terminate::AlreadyGone) => {
                debug!("Tunnel '{}' (PID {}) was already gone", name, pid);
                remove_if_present(&self.pid_file(name))?;
                Ok(StopOutcome::AlreadyGone { pid })
            }
            // Registry entry kept so the user can retry.
            Err(source) => Err(TunnelError::ProcessSignal { pid, source }),
        }
    }
}

/// A tunnel attached to the current invocation.
#[derive(Debug)]
pub struct ForegroundTunnel {
    pub handle: TunnelHandle,
    child: Child,
}

impl ForegroundTunnel {
    /// Blocks until the tunnel exits on its own or the invocation is
    /// interrupted. An interrupt kills the child before returning, so a
    /// foreground tunnel is never orphaned.
    pub async fn wait(mut self) -> Result<(), TunnelError> {
        tokio::select! {
            status = self.child.wait() => {
                let status = status?;
                info!("Tunnel '{}' exited with {}", self.handle.name, status);
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted; terminating tunnel '{}'", self.handle.name);
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Can another listener bind the forward port right now?
fn local_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// New session for the child so it survives this invocation and its
/// terminal.
#[cfg(unix)]
fn detach_from_session(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and called in the forked child
    // before exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_from_session(_cmd: &mut Command) {}

fn read_pid(path: &Path) -> Result<Option<i32>, TunnelError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match text.trim().parse::<i32>() {
        Ok(pid) => Ok(Some(pid)),
        Err(_) => {
            warn!("Discarding unparsable PID file {:?}", path);
            remove_if_present(path)?;
            Ok(None)
        }
    }
}

/// Whole-file write via temp-then-rename; a concurrent reader never sees a
/// partial PID.
fn write_pid(path: &Path, pid: i32) -> Result<(), TunnelError> {
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, pid.to_string())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), TunnelError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn read_log_tail(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let text = text.trim();
    let tail_start = text.len().saturating_sub(DIAGNOSTIC_TAIL);
    // Avoid splitting a UTF-8 sequence.
    let mut start = tail_start;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    Some(text[start..].to_string())
}
