//! The core-visible configuration surface (spec §6).
//!
//! Everything else about CLI parsing, REPL options, and general config file
//! formats is external to the core; this module only holds the two knobs the
//! core itself reads: the listen port and the heap swap directory.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{RayError, Result};

/// Environment variable naming the directory used to back heap pools with
/// files when anonymous `mmap` fails (spec §6, §4.1).
pub const SWAP_DIR_ENV: &str = "RAYFORCE_SWAP_DIR";

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Presence enables the listening socket at startup; this is the single
    /// core-visible CLI option (spec §6).
    pub listen_port: Option<u16>,
    /// Directory for file-backed heap overflow pools.
    pub swap_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_port: None,
            swap_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl RuntimeConfig {
    /// Build from the environment and an optional explicit port (the core's
    /// only CLI-visible value; the caller is responsible for parsing the
    /// flag itself).
    pub fn from_env(listen_port: Option<u16>) -> Result<Self> {
        let swap_dir = match env::var_os(SWAP_DIR_ENV) {
            Some(v) => PathBuf::from(v),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        Self::validate_swap_dir(&swap_dir)?;
        Ok(Self { listen_port, swap_dir })
    }

    fn validate_swap_dir(dir: &Path) -> Result<()> {
        let meta = std::fs::metadata(dir).map_err(|e| {
            RayError::Os(e.raw_os_error().unwrap_or(libc::ENOENT))
        })?;
        if !meta.is_dir() {
            return Err(RayError::Os(libc::ENOTDIR));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_cwd() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.listen_port.is_none());
        assert!(cfg.swap_dir.is_dir());
    }

    #[test]
    fn rejects_nonexistent_swap_dir() {
        let err = RuntimeConfig::validate_swap_dir(Path::new("/does/not/exist/rayforce"));
        assert!(err.is_err());
    }
}
