//! Vault configuration.

use serde::{Deserialize, Serialize};

/// Argon2id parameters for deriving the vault key.
///
/// Stored alongside the vault so it can be reopened after the defaults
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Memory cost in KiB (default: 65536 = 64MB).
    pub argon2_memory_cost: u32,
    /// Time cost in iterations (default: 3).
    pub argon2_time_cost: u32,
    /// Parallelism (default: 4).
    pub argon2_parallelism: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl VaultConfig {
    /// The cheapest parameters Argon2 accepts. For tests only.
    pub fn insecure_fast() -> Self {
        Self {
            argon2_memory_cost: 8,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }
}
