use std::path::Path;

use log::{debug, info};
use tokio::process::Command;

use crate::core::errors::TunnelError;
use crate::ssh::options::SshOptions;

/// Harmless command run on the remote side; its exit status is the signal.
const PROBE_COMMAND: &str = "echo 'Connection test successful'";

/// Result of one connectivity check.
///
/// `ok = false` is a normal outcome (refused, timed out, auth rejected),
/// never an error. `diagnostics` carries the SSH client's stderr when the
/// probe ran in verbose mode.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub ok: bool,
    pub diagnostics: Option<String>,
}

/// Non-interactive reachability check against a remote host with a specific
/// key. Does not establish a persistent tunnel.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityProbe {
    options: SshOptions,
}

impl ConnectivityProbe {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Runs the SSH client in batch mode with a bounded connect timeout and
    /// reports whether the remote no-op command exited zero.
    ///
    /// Only environment failures (client binary missing, cannot spawn) are
    /// errors; every connectivity failure is `ok = false`.
    pub async fn test(
        &self,
        host: &str,
        port: u16,
        key_path: &Path,
        verbose: bool,
    ) -> Result<ProbeReport, TunnelError> {
        let opts = &self.options;
        let mut cmd = Command::new(&opts.program);
        cmd.arg("-i")
            .arg(key_path)
            .args(["-p", &port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .args([
                "-o",
                &format!(
                    "StrictHostKeyChecking={}",
                    opts.host_key_policy.as_option_value()
                ),
            ])
            .args([
                "-o",
                &format!("ConnectTimeout={}", opts.connect_timeout.as_secs()),
            ]);
        if verbose {
            cmd.arg("-v");
        }
        cmd.arg(format!("{}@{}", opts.user, host)).arg(PROBE_COMMAND);

        info!("Probing {}:{} with key {}", host, port, key_path.display());
        let output = cmd.output().await?;
        debug!("Probe of {}:{} exited with {}", host, port, output.status);

        let diagnostics = if verbose {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            (!stderr.is_empty()).then_some(stderr)
        } else {
            None
        };
        Ok(ProbeReport {
            ok: output.status.success(),
            diagnostics,
        })
    }
}
