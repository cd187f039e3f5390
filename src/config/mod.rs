//! Configuration management
//!
//! A user-written `config.toml` is validated and expanded into a
//! `config.lock` with every default filled in; the lock header records a
//! hash of the source it was generated from.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Load user configuration from a TOML file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Load a generated lock file.
pub fn load_lock<P: AsRef<Path>>(path: P) -> Result<ConfigLock> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let lock: ConfigLock = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(lock)
}

/// Expand a config into a lock file, stamping the source hash.
pub fn generate_lock(config: &Config, source_content: &str) -> ConfigLock {
    ConfigLock::from_config(config, compute_hash(source_content))
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
    }
}
