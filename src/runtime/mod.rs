//! Host access used by the engine: files under the state root, environment, privilege.
//!
//! Everything above this layer takes a [`Runtime`] so tests can swap in `MockRuntime`.

mod env;
mod fs;

use anyhow::Result;
use std::env::VarError;
use std::path::{Path, PathBuf};

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    fn env_var(&self, key: &str) -> Result<String, VarError>;
    fn home_dir(&self) -> Option<PathBuf>;
    /// Root on unix, elevated on windows.
    fn is_privileged(&self) -> bool;

    fn exists(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Replace `path` so readers never observe a half-written file.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let staging = fs::staging_path(path);
        self.write(&staging, contents)?;
        self.rename(&staging, path)
    }
}

/// [`Runtime`] backed by the local machine.
pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, VarError> {
        std::env::var(key)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    fn is_privileged(&self) -> bool {
        env::is_privileged()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
    }
}
