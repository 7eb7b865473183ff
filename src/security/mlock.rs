//! Process-level memory protection
//!
//! Decrypted BLS secret keys live in process memory for as long as an
//! account stays unlocked. Core dumps would write them to disk, so they are
//! disabled at startup where the platform allows it.

use crate::errors::Result;
use tracing::{debug, warn};

/// Check if we can lock memory (requires appropriate privileges or rlimits)
pub fn can_lock_memory() -> bool {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::resource::{getrlimit, Resource};

        match getrlimit(Resource::RLIMIT_MEMLOCK) {
            Ok((soft, _hard)) => soft > 0,
            Err(_) => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

/// Set up memory protection for the process.
/// Call this early in main().
pub fn setup_memory_protection(disable_core_dumps: bool) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::resource::{setrlimit, Resource};

        if disable_core_dumps {
            if let Err(e) = setrlimit(Resource::RLIMIT_CORE, 0, 0) {
                warn!("Could not disable core dumps: {}", e);
            } else {
                debug!("Core dumps disabled");
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        if disable_core_dumps {
            warn!("Disabling core dumps is not supported on this platform");
        }
    }

    if can_lock_memory() {
        debug!("Memory locking is available");
    } else {
        warn!("Memory locking may not be available - consider increasing RLIMIT_MEMLOCK");
    }

    Ok(())
}
