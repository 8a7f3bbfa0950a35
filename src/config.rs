// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup into a typed
//! [`DaemonConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TWIN_ID` | Identity handle of this device in the registry | Required |
//! | `ACL_ROLE` | Role holding the allow-list datalog | `acl` |
//! | `DEVICE_ROLE` | Role of the device's own account | `device` |
//! | `CHAIN_RPC_URL` | JSON-RPC endpoint of the chain node | Required |
//! | `IDENTITY_REGISTRY_ADDRESS` | Identity registry contract | Required |
//! | `DATALOG_ADDRESS` | Datalog contract | Required |
//! | `INCOME_TOKEN_ADDRESS` | Token whose transfers count as income | Required |
//! | `LAUNCH_ADDRESS` | Launch contract for start/stop commands | Optional |
//! | `CHAIN_POLL_INTERVAL_MS` | Head poll interval | `2000` |
//! | `INCOME_THRESHOLD` | Income must exceed this (smallest unit) | `0` |
//! | `INCOME_DECIMALS` | Token decimals, for log output only (0-77) | `18` |
//! | `IPFS_API_URL` | Content store HTTP API | `http://127.0.0.1:5001` |
//! | `PINATA_API_KEY` | Mirror credentials (with the secret) | Optional |
//! | `PINATA_SECRET_API_KEY` | Mirror credentials (with the key) | Optional |
//! | `DEVICE_PRIVATE_KEY` | Device signing key, hex | Optional |
//! | `DEVICE_KEY_PEM_PATH` | Device signing key, PEM file | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;

use crate::blockchain::signing::{signer_from_hex, signer_from_pem};
use crate::blockchain::IdentityHandle;
use crate::error::SetupError;
use crate::logging::LogFormat;

pub const TWIN_ID_ENV: &str = "TWIN_ID";
pub const ACL_ROLE_ENV: &str = "ACL_ROLE";
pub const DEVICE_ROLE_ENV: &str = "DEVICE_ROLE";
pub const CHAIN_RPC_URL_ENV: &str = "CHAIN_RPC_URL";
pub const IDENTITY_REGISTRY_ENV: &str = "IDENTITY_REGISTRY_ADDRESS";
pub const DATALOG_ENV: &str = "DATALOG_ADDRESS";
pub const INCOME_TOKEN_ENV: &str = "INCOME_TOKEN_ADDRESS";
pub const LAUNCH_ENV: &str = "LAUNCH_ADDRESS";
pub const CHAIN_POLL_INTERVAL_ENV: &str = "CHAIN_POLL_INTERVAL_MS";
pub const INCOME_THRESHOLD_ENV: &str = "INCOME_THRESHOLD";
pub const INCOME_DECIMALS_ENV: &str = "INCOME_DECIMALS";
pub const IPFS_API_URL_ENV: &str = "IPFS_API_URL";
pub const PINATA_API_KEY_ENV: &str = "PINATA_API_KEY";
pub const PINATA_SECRET_ENV: &str = "PINATA_SECRET_API_KEY";
pub const DEVICE_PRIVATE_KEY_ENV: &str = "DEVICE_PRIVATE_KEY";
pub const DEVICE_KEY_PEM_PATH_ENV: &str = "DEVICE_KEY_PEM_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_ACL_ROLE: &str = "acl";
pub const DEFAULT_DEVICE_ROLE: &str = "device";
pub const DEFAULT_IPFS_API_URL: &str = "http://127.0.0.1:5001";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_INCOME_DECIMALS: u8 = 18;
/// 10^78 no longer fits in a `U256`.
const MAX_INCOME_DECIMALS: u8 = 77;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Chain node and contract locations.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub identity_registry: Address,
    pub datalog: Address,
    pub income_token: Address,
    pub launch: Option<Address>,
    pub poll_interval: Duration,
}

/// Pinata mirror credentials.
#[derive(Clone)]
pub struct PinataCredentials {
    pub api_key: String,
    pub secret_api_key: String,
}

impl fmt::Debug for PinataCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataCredentials")
            .field("api_key", &self.api_key)
            .field("secret_api_key", &"<redacted>")
            .finish()
    }
}

/// Content store endpoint and optional mirror.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub api_url: String,
    pub pinata: Option<PinataCredentials>,
}

/// Where the device signing key comes from.
#[derive(Clone)]
pub enum DeviceCredential {
    Hex(String),
    PemFile(PathBuf),
}

impl DeviceCredential {
    /// Load the signer.
    pub fn load_signer(&self) -> Result<PrivateKeySigner, SetupError> {
        match self {
            DeviceCredential::Hex(hex) => signer_from_hex(hex),
            DeviceCredential::PemFile(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    SetupError::InvalidCredential(format!("{}: {e}", path.display()))
                })?;
                signer_from_pem(&pem)
            }
        }
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCredential::Hex(_) => f.write_str("Hex(<redacted>)"),
            DeviceCredential::PemFile(path) => f.debug_tuple("PemFile").field(path).finish(),
        }
    }
}

/// Everything the daemon needs, parsed and validated.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub identity: IdentityHandle,
    pub acl_role: String,
    pub device_role: String,
    pub chain: ChainConfig,
    pub content: ContentConfig,
    pub income_threshold: U256,
    pub income_decimals: u8,
    pub device_credential: Option<DeviceCredential>,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let identity = IdentityHandle(parse(TWIN_ID_ENV, &require(TWIN_ID_ENV)?)?);

        let poll_ms: u64 = match get(CHAIN_POLL_INTERVAL_ENV) {
            Some(raw) => parse(CHAIN_POLL_INTERVAL_ENV, &raw)?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };
        if poll_ms == 0 {
            return Err(ConfigError::Invalid {
                name: CHAIN_POLL_INTERVAL_ENV,
                reason: "must be positive".to_string(),
            });
        }

        let chain = ChainConfig {
            rpc_url: require(CHAIN_RPC_URL_ENV)?,
            identity_registry: parse(IDENTITY_REGISTRY_ENV, &require(IDENTITY_REGISTRY_ENV)?)?,
            datalog: parse(DATALOG_ENV, &require(DATALOG_ENV)?)?,
            income_token: parse(INCOME_TOKEN_ENV, &require(INCOME_TOKEN_ENV)?)?,
            launch: get(LAUNCH_ENV).map(|raw| parse(LAUNCH_ENV, &raw)).transpose()?,
            poll_interval: Duration::from_millis(poll_ms),
        };

        let pinata = match (get(PINATA_API_KEY_ENV), get(PINATA_SECRET_ENV)) {
            (Some(api_key), Some(secret_api_key)) => Some(PinataCredentials {
                api_key,
                secret_api_key,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: PINATA_API_KEY_ENV,
                    reason: format!("{PINATA_API_KEY_ENV} and {PINATA_SECRET_ENV} must be set together"),
                })
            }
        };

        let content = ContentConfig {
            api_url: get(IPFS_API_URL_ENV).unwrap_or_else(|| DEFAULT_IPFS_API_URL.to_string()),
            pinata,
        };

        let income_threshold = match get(INCOME_THRESHOLD_ENV) {
            Some(raw) => parse(INCOME_THRESHOLD_ENV, &raw)?,
            None => U256::ZERO,
        };

        let income_decimals = match get(INCOME_DECIMALS_ENV) {
            Some(raw) => parse(INCOME_DECIMALS_ENV, &raw)?,
            None => DEFAULT_INCOME_DECIMALS,
        };
        if income_decimals > MAX_INCOME_DECIMALS {
            return Err(ConfigError::Invalid {
                name: INCOME_DECIMALS_ENV,
                reason: format!("must be at most {MAX_INCOME_DECIMALS}"),
            });
        }

        let device_credential = match (get(DEVICE_PRIVATE_KEY_ENV), get(DEVICE_KEY_PEM_PATH_ENV)) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid {
                    name: DEVICE_PRIVATE_KEY_ENV,
                    reason: format!("set only one of {DEVICE_PRIVATE_KEY_ENV} and {DEVICE_KEY_PEM_PATH_ENV}"),
                })
            }
            (Some(hex), None) => Some(DeviceCredential::Hex(hex)),
            (None, Some(path)) => Some(DeviceCredential::PemFile(PathBuf::from(path))),
            (None, None) => None,
        };

        let log_format = match get(LOG_FORMAT_ENV) {
            Some(raw) => parse(LOG_FORMAT_ENV, &raw)?,
            None => LogFormat::default(),
        };

        Ok(Self {
            identity,
            acl_role: get(ACL_ROLE_ENV).unwrap_or_else(|| DEFAULT_ACL_ROLE.to_string()),
            device_role: get(DEVICE_ROLE_ENV).unwrap_or_else(|| DEFAULT_DEVICE_ROLE.to_string()),
            chain,
            content,
            income_threshold,
            income_decimals,
            device_credential,
            log_format,
        })
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            (TWIN_ID_ENV, "3".to_string()),
            (CHAIN_RPC_URL_ENV, "http://127.0.0.1:8545".to_string()),
            (
                IDENTITY_REGISTRY_ENV,
                "0x1111111111111111111111111111111111111111".to_string(),
            ),
            (
                DATALOG_ENV,
                "0x2222222222222222222222222222222222222222".to_string(),
            ),
            (
                INCOME_TOKEN_ENV,
                "0x3333333333333333333333333333333333333333".to_string(),
            ),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<DaemonConfig, ConfigError> {
        DaemonConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.identity, IdentityHandle(3));
        assert_eq!(config.acl_role, "acl");
        assert_eq!(config.device_role, "device");
        assert_eq!(config.chain.poll_interval, Duration::from_secs(2));
        assert_eq!(config.content.api_url, DEFAULT_IPFS_API_URL);
        assert!(config.content.pinata.is_none());
        assert_eq!(config.income_threshold, U256::ZERO);
        assert_eq!(config.income_decimals, 18);
        assert!(config.chain.launch.is_none());
        assert!(config.device_credential.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut env = base_env();
        env.insert(ACL_ROLE_ENV, "allowlist".into());
        env.insert(INCOME_THRESHOLD_ENV, "1000".into());
        env.insert(CHAIN_POLL_INTERVAL_ENV, "250".into());
        env.insert(PINATA_API_KEY_ENV, "key".into());
        env.insert(PINATA_SECRET_ENV, "secret".into());
        env.insert(DEVICE_KEY_PEM_PATH_ENV, "/etc/device/key.pem".into());
        env.insert(LOG_FORMAT_ENV, "json".into());
        env.insert(LAUNCH_ENV, "0x4444444444444444444444444444444444444444".into());
        env.insert(INCOME_DECIMALS_ENV, "77".into());

        let config = load(&env).unwrap();
        assert_eq!(config.chain.launch, Some(Address::repeat_byte(0x44)));
        assert_eq!(config.income_decimals, 77);
        assert_eq!(config.acl_role, "allowlist");
        assert_eq!(config.income_threshold, U256::from(1000u64));
        assert_eq!(config.chain.poll_interval, Duration::from_millis(250));
        assert_eq!(config.content.pinata.as_ref().unwrap().api_key, "key");
        assert!(matches!(
            config.device_credential,
            Some(DeviceCredential::PemFile(_))
        ));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn missing_required_variable() {
        let mut env = base_env();
        env.remove(DATALOG_ENV);
        assert!(matches!(load(&env), Err(ConfigError::Missing(DATALOG_ENV))));

        let mut env = base_env();
        env.insert(TWIN_ID_ENV, "   ".into());
        assert!(matches!(load(&env), Err(ConfigError::Missing(TWIN_ID_ENV))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut env = base_env();
        env.insert(DATALOG_ENV, "0xnot-an-address".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { name: DATALOG_ENV, .. })
        ));

        let mut env = base_env();
        env.insert(PINATA_API_KEY_ENV, "only-key".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));

        let mut env = base_env();
        env.insert(INCOME_DECIMALS_ENV, "78".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { name: INCOME_DECIMALS_ENV, .. })
        ));

        let mut env = base_env();
        env.insert(CHAIN_POLL_INTERVAL_ENV, "0".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));

        let mut env = base_env();
        env.insert(DEVICE_PRIVATE_KEY_ENV, "ab".into());
        env.insert(DEVICE_KEY_PEM_PATH_ENV, "/k.pem".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut env = base_env();
        env.insert(DEVICE_PRIVATE_KEY_ENV, "deadbeefcafe".into());
        env.insert(PINATA_API_KEY_ENV, "key".into());
        env.insert(PINATA_SECRET_ENV, "topsecret".into());

        let rendered = format!("{:?}", load(&env).unwrap());
        assert!(!rendered.contains("deadbeefcafe"));
        assert!(!rendered.contains("topsecret"));
    }
}
