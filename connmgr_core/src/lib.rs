pub mod core;
pub mod ssh;
pub mod storage;
pub mod utils;

// re‑export ergonomic entry points
pub use crate::core::context::AppContext;
pub use crate::core::errors::TunnelError;
pub use crate::core::supervisor::{
    ForegroundTunnel, StopOutcome, TunnelHandle, TunnelLaunch, TunnelRequest, TunnelState,
    TunnelSupervisor,
};
pub use crate::ssh::keys::{KeyPair, KeyProvisioner};
pub use crate::ssh::options::{HostKeyPolicy, SshOptions};
pub use crate::ssh::probe::{ConnectivityProbe, ProbeReport};
pub use crate::storage::record::ConnectionRecord;
pub use crate::storage::store::ConnectionStore;
