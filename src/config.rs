// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the library. Configuration is loaded from the environment at
//! startup by the embedding application.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HEALTHSWAP_RPC_URL` | EVM RPC endpoint for the escrow ledger | Required |
//! | `HEALTHSWAP_CONTRACT` | Deployed escrow contract address | Required |
//! | `HEALTHSWAP_RELAYS` | Comma-separated relay URLs | Built-in relay set |
//! | `HEALTHSWAP_TIMELOCK_SECS` | Relative timelock for new locks | `86400` (24h) |
//! | `HEALTHSWAP_CONFIRMATION_TIMEOUT_SECS` | Bound on one confirmation wait | `180` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::time::Duration;

use alloy::primitives::Address;

/// Environment variable name for the escrow ledger RPC endpoint.
pub const RPC_URL_ENV: &str = "HEALTHSWAP_RPC_URL";

/// Environment variable name for the deployed escrow contract address.
pub const CONTRACT_ENV: &str = "HEALTHSWAP_CONTRACT";

/// Environment variable name for the relay URL list (comma separated).
pub const RELAYS_ENV: &str = "HEALTHSWAP_RELAYS";

/// Environment variable name for the relative timelock in seconds.
pub const TIMELOCK_ENV: &str = "HEALTHSWAP_TIMELOCK_SECS";

/// Environment variable name for the confirmation wait bound in seconds.
pub const CONFIRMATION_TIMEOUT_ENV: &str = "HEALTHSWAP_CONFIRMATION_TIMEOUT_SECS";

/// Default relative timelock: funds are refundable after 24h if the
/// provider never responds.
pub const DEFAULT_TIMELOCK_SECS: u64 = 86_400;

/// Default bound on a single transaction confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 180;

/// Default relay set used when `HEALTHSWAP_RELAYS` is not set.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://nos.lol",
    "wss://relay.snort.social",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Resolved protocol configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub rpc_url: String,
    pub contract: Address,
    pub relays: Vec<String>,
    pub timelock_duration: u64,
    pub confirmation_timeout: Duration,
}

impl ProtocolConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = env::var(RPC_URL_ENV).map_err(|_| ConfigError::Missing(RPC_URL_ENV))?;

        let contract_raw =
            env::var(CONTRACT_ENV).map_err(|_| ConfigError::Missing(CONTRACT_ENV))?;
        let contract = contract_raw.parse().map_err(|_| ConfigError::Invalid {
            var: CONTRACT_ENV,
            value: contract_raw,
        })?;

        let relays = match env::var(RELAYS_ENV) {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
        };

        let timelock_duration = parse_secs(TIMELOCK_ENV, DEFAULT_TIMELOCK_SECS)?;
        let confirmation_timeout = Duration::from_secs(parse_secs(
            CONFIRMATION_TIMEOUT_ENV,
            DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        )?);

        Ok(Self {
            rpc_url,
            contract,
            relays,
            timelock_duration,
            confirmation_timeout,
        })
    }
}

fn parse_secs(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(default),
    }
}
