//! Administrative privilege check for daemon mode.

use crate::errors::{ActivationError, ActivationResult};

/// Whether the process runs with full administrative privileges.
#[cfg(unix)]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_privileged() -> bool {
    false
}

/// Fail with [`ActivationError::NotPrivileged`] unless running as root.
pub fn require_privileged() -> ActivationResult<()> {
    if is_privileged() {
        Ok(())
    } else {
        Err(ActivationError::NotPrivileged)
    }
}
