// tests/hw_keys.rs
#![cfg(all(unix, feature = "hw-tests"))]

//! Runs the real `ssh-keygen`. Enable with `--features hw-tests`.

use std::fs;

use connmgr_core::KeyProvisioner;
use tempfile::TempDir;

#[tokio::test]
async fn real_keygen_produces_an_ed25519_pair() -> anyhow::Result<()> {
    which::which("ssh-keygen").expect("ssh-keygen must be on PATH for hw-tests");

    let dir = TempDir::new()?;
    let keys_dir = dir.path().join("keys");
    fs::create_dir_all(&keys_dir)?;
    let keys = KeyProvisioner::new(keys_dir);

    let pair = keys.ensure_key("hwtest", false).await?;
    assert!(pair.private_key.exists());
    let pub_key = keys.public_key_content("hwtest")?.expect("public key exists");
    assert!(
        pub_key.starts_with("ssh-ed25519 "),
        "expected an Ed25519 public key, got: {pub_key}"
    );
    Ok(())
}
