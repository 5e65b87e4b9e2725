use std::path::{Path, PathBuf};
use std::{fs, io};

use directories::ProjectDirs;

/// Filesystem layout for one CLI invocation.
///
/// Constructed once per invocation and passed to every component; there are
/// no implicit singletons. All directories are created up front so each
/// component can assume its directory exists.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config_file: PathBuf,
    pub keys_dir: PathBuf,
    pub pid_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppContext {
    /// `~/.config/connmgr` on Linux, `%APPDATA%\connmgr` on Windows, etc.
    pub fn new() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "connmgr")
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Unable to locate config dir"))?;
        Self::at(proj.config_dir())
    }

    /// Rooted at an explicit directory. Used by tests and overrides.
    pub fn at(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let ctx = Self {
            config_file: root.join("config.json"),
            keys_dir: root.join("keys"),
            pid_dir: root.join("pids"),
            log_dir: root.join("logs"),
        };
        ctx.bootstrap()?;
        Ok(ctx)
    }

    /// Idempotent: safe to run on every invocation.
    fn bootstrap(&self) -> io::Result<()> {
        for dir in [&self.keys_dir, &self.pid_dir, &self.log_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
