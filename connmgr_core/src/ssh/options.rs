use std::time::Duration;

/// How the SSH client treats a host key it has not seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust-on-first-use: accept and record unknown keys, reject changed ones.
    AcceptNew,
    /// Reject unknown keys; requires the host in known_hosts beforehand.
    Strict,
    /// Accept anything. Only sensible on throwaway networks.
    Off,
}

impl HostKeyPolicy {
    /// Value for `-o StrictHostKeyChecking=`.
    pub fn as_option_value(&self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Strict => "yes",
            HostKeyPolicy::Off => "no",
        }
    }
}

/// Settings shared by the connectivity probe and the tunnel supervisor.
///
/// `program` exists so tests can substitute a stub for the real `ssh`
/// binary; everything else has the defaults the tool has always used.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub program: String,
    pub user: String,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            user: "root".to_string(),
            host_key_policy: HostKeyPolicy::AcceptNew,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
