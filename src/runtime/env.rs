#[cfg(unix)]
pub(super) fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(windows)]
pub(super) fn is_privileged() -> bool {
    is_elevated::is_elevated()
}
