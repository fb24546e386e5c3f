use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

pub const STATE_FILE: &str = "state.json";
pub const ETC_DIR: &str = "etc";
pub const BOOT_FILE: &str = "features.json";

#[cfg(target_os = "macos")]
const SYSTEM_ROOT: &str = "/opt/provi";
#[cfg(target_os = "windows")]
const SYSTEM_ROOT: &str = r"C:\ProgramData\provi";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const SYSTEM_ROOT: &str = "/usr/local/provi";

/// Root for state and configuration when none is given.
///
/// Privileged users share a system-wide root; everyone else gets `~/.provi`.
#[tracing::instrument(skip(runtime))]
pub fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        return Ok(PathBuf::from(SYSTEM_ROOT));
    }
    runtime
        .home_dir()
        .map(|home| home.join(".provi"))
        .context("No home directory to place ~/.provi in; pass --root")
}

/// `<root>/state.json`
pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

/// `<root>/etc`, where configuration pids live.
pub fn etc_dir(root: &Path) -> PathBuf {
    root.join(ETC_DIR)
}

pub fn boot_config_path(root: &Path) -> PathBuf {
    etc_dir(root).join(BOOT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::test_utils::{test_home, test_root};

    #[test]
    fn test_default_root_in_home() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| Some(test_home()));

        assert_eq!(default_root(&runtime).unwrap(), test_root());
    }

    #[test]
    fn test_default_root_no_home() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| None);

        let err = default_root(&runtime).unwrap_err();
        assert!(err.to_string().contains("home directory"));
    }

    #[test]
    fn test_default_root_privileged() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| true);

        assert_eq!(default_root(&runtime).unwrap(), PathBuf::from(SYSTEM_ROOT));
    }

    #[test]
    fn test_layout_under_root() {
        let root = PathBuf::from("/srv/provi");
        assert_eq!(state_path(&root), root.join("state.json"));
        assert_eq!(boot_config_path(&root), root.join("etc").join("features.json"));
    }
}
