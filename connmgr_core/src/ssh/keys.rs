use std::path::{Path, PathBuf};
use std::{fs, io};

use log::{debug, info};
use tokio::process::Command;

use crate::core::errors::TunnelError;

/// The two files of a provisioned key, at their deterministic paths.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// Generates and locates per-connection Ed25519 key pairs.
///
/// A key is generated at most once per connection name; an existing private
/// key short-circuits `ensure_key` so that already-installed
/// authorized_keys entries on remote hosts keep working. `force` is the
/// explicit escape hatch for rotation.
#[derive(Debug, Clone)]
pub struct KeyProvisioner {
    keys_dir: PathBuf,
    program: String,
}

impl KeyProvisioner {
    pub fn new(keys_dir: PathBuf) -> Self {
        Self {
            keys_dir,
            program: "ssh-keygen".to_string(),
        }
    }

    /// Substitute the key-generation binary. Used by tests.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Path of the private key for `name`. Pure derivation, no I/O.
    pub fn key_path(&self, name: &str) -> PathBuf {
        self.keys_dir.join(name)
    }

    fn public_key_path(&self, name: &str) -> PathBuf {
        self.keys_dir.join(format!("{name}.pub"))
    }

    /// Returns the key pair for `name`, generating it if needed.
    ///
    /// Without `force`, an existing private key is returned as-is and no
    /// subprocess runs. With `force`, any existing pair is removed first and
    /// fresh key material is generated.
    pub async fn ensure_key(&self, name: &str, force: bool) -> Result<KeyPair, TunnelError> {
        let pair = KeyPair {
            private_key: self.key_path(name),
            public_key: self.public_key_path(name),
        };

        if pair.private_key.exists() && !force {
            debug!("Key for '{}' already exists, skipping generation", name);
            return Ok(pair);
        }
        if force {
            remove_if_present(&pair.private_key)?;
            remove_if_present(&pair.public_key)?;
        }

        info!("Generating Ed25519 key pair for '{}'", name);
        let output = Command::new(&self.program)
            .arg("-q")
            .args(["-t", "ed25519"])
            .arg("-f")
            .arg(&pair.private_key)
            .args(["-N", ""]) // empty passphrase
            .args(["-C", &format!("connmgr-{name}")])
            .output()
            .await
            .map_err(|e| TunnelError::KeyGen(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(TunnelError::KeyGen(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !pair.private_key.exists() || !pair.public_key.exists() {
            return Err(TunnelError::KeyGen(format!(
                "{} did not produce the expected files at {}",
                self.program,
                pair.private_key.display()
            )));
        }

        set_key_permissions(&pair)?;
        Ok(pair)
    }

    /// Trimmed contents of the public key file; `None` if it does not exist.
    pub fn public_key_content(&self, name: &str) -> Result<Option<String>, TunnelError> {
        match fs::read_to_string(self.public_key_path(name)) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), TunnelError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Private key 0600, public key 0644.
#[cfg(unix)]
fn set_key_permissions(pair: &KeyPair) -> Result<(), TunnelError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(&pair.private_key, fs::Permissions::from_mode(0o600))?;
    fs::set_permissions(&pair.public_key, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_key_permissions(_pair: &KeyPair) -> Result<(), TunnelError> {
    Ok(())
}
