use std::fmt::{self, Display};
use std::path::PathBuf;

/// A central error enum for tunnel and store errors.
#[derive(Debug)]
pub enum TunnelError {
    /// The backing store could not be read or written.
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A connection name that is empty or not ASCII alphanumeric.
    InvalidName(String),
    /// The referenced connection does not exist in the store.
    NotFound(String),
    /// The external key-generation tool failed or did not produce the key pair.
    KeyGen(String),
    /// A live tunnel already exists for this connection.
    AlreadyRunning { name: String, pid: i32 },
    /// The requested local port is bound by another process.
    PortInUse(u16),
    /// The tunnel subprocess exited before it was confirmed live.
    TunnelSetup { name: String, detail: String },
    /// Sending a termination signal failed for a reason other than "already gone".
    ProcessSignal {
        pid: i32,
        source: std::io::Error,
    },
    IoError(std::io::Error),
}

/// Convert from std::io::Error.
impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> TunnelError {
        TunnelError::IoError(err)
    }
}

impl Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::Storage { path, source } => {
                write!(f, "Storage error on {}: {}", path.display(), source)
            }
            TunnelError::InvalidName(name) => {
                write!(
                    f,
                    "Invalid connection name '{}': must be non-empty and alphanumeric",
                    name
                )
            }
            TunnelError::NotFound(name) => {
                write!(f, "No connection found with name: {}", name)
            }
            TunnelError::KeyGen(msg) => write!(f, "Key generation failed: {}", msg),
            TunnelError::AlreadyRunning { name, pid } => {
                write!(f, "Connection {} is already running (PID: {})", name, pid)
            }
            TunnelError::PortInUse(port) => {
                write!(f, "Port {} is already in use", port)
            }
            TunnelError::TunnelSetup { name, detail } => {
                write!(f, "Tunnel setup failed for {}: {}", name, detail)
            }
            TunnelError::ProcessSignal { pid, source } => {
                write!(f, "Failed to signal process {}: {}", pid, source)
            }
            TunnelError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunnelError::Storage { source, .. } => Some(source),
            TunnelError::ProcessSignal { source, .. } => Some(source),
            TunnelError::IoError(e) => Some(e),
            _ => None,
        }
    }
}
