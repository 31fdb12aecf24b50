use crate::cache::CachePolicy;
use crate::validate::ValidateOptions;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_TRUSTED_LIST_CACHE_SECS: u64 = 3600;
const DEFAULT_KEY_SET_STALE_SECS: u64 = 3600;
const DEFAULT_FAILURE_GRACE_SECS: u64 = 24 * 3600;
const DEFAULT_MAX_CACHE_BYTES: usize = 20_000_000;

// Trust engine configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    // Bound on every key-set and trust-list fetch.
    pub timeout_ms: u64,
    // How long a fetched trust list is reused before refetching.
    pub trusted_list_cache_secs: u64,
    // Age after which a cached key set no longer short-circuits a fetch.
    pub key_set_stale_secs: u64,
    // How long a cached document may stand in for failed fetches.
    pub failure_grace_secs: u64,
    // Ceiling on cached bytes, per cache.
    pub max_cache_bytes: usize,
    pub additional_trusted_list_uris: Vec<String>,
    pub disable_default_trusted_list_uri: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            trusted_list_cache_secs: DEFAULT_TRUSTED_LIST_CACHE_SECS,
            key_set_stale_secs: DEFAULT_KEY_SET_STALE_SECS,
            failure_grace_secs: DEFAULT_FAILURE_GRACE_SECS,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            additional_trusted_list_uris: Vec::new(),
            disable_default_trusted_list_uri: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrustConfigOverride {
    timeout_ms: Option<u64>,
    trusted_list_cache_secs: Option<u64>,
    key_set_stale_secs: Option<u64>,
    failure_grace_secs: Option<u64>,
    max_cache_bytes: Option<usize>,
    additional_trusted_list_uris: Option<Vec<String>>,
    disable_default_trusted_list_uri: Option<bool>,
}

impl TrustConfig {
    pub fn from_env() -> Result<Self> {
        let timeout_ms = positive_env("CERTS_FETCH_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS);
        let trusted_list_cache_secs =
            positive_env("CERTS_TRUSTED_LIST_CACHE_SECS").unwrap_or(DEFAULT_TRUSTED_LIST_CACHE_SECS);
        let key_set_stale_secs =
            positive_env("CERTS_KEY_SET_STALE_SECS").unwrap_or(DEFAULT_KEY_SET_STALE_SECS);
        let failure_grace_secs =
            positive_env("CERTS_FAILURE_GRACE_SECS").unwrap_or(DEFAULT_FAILURE_GRACE_SECS);
        let max_cache_bytes =
            positive_env("CERTS_MAX_CACHE_BYTES").unwrap_or(DEFAULT_MAX_CACHE_BYTES);
        let additional_trusted_list_uris = std::env::var("CERTS_ADDITIONAL_TRUSTED_LISTS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|uri| !uri.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let disable_default_trusted_list_uri = std::env::var("CERTS_DISABLE_DEFAULT_TRUSTED_LIST")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(Self {
            timeout_ms,
            trusted_list_cache_secs,
            key_set_stale_secs,
            failure_grace_secs,
            max_cache_bytes,
            additional_trusted_list_uris,
            disable_default_trusted_list_uri,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CERTS_CONFIG") {
            // YAML values win over the environment.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read CERTS_CONFIG: {path}"))?;
            let override_cfg: TrustConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse certs config yaml")?;
            if let Some(value) = override_cfg.timeout_ms.filter(|value| *value > 0) {
                config.timeout_ms = value;
            }
            if let Some(value) = override_cfg.trusted_list_cache_secs.filter(|value| *value > 0) {
                config.trusted_list_cache_secs = value;
            }
            if let Some(value) = override_cfg.key_set_stale_secs.filter(|value| *value > 0) {
                config.key_set_stale_secs = value;
            }
            if let Some(value) = override_cfg.failure_grace_secs.filter(|value| *value > 0) {
                config.failure_grace_secs = value;
            }
            if let Some(value) = override_cfg.max_cache_bytes.filter(|value| *value > 0) {
                config.max_cache_bytes = value;
            }
            if let Some(value) = override_cfg.additional_trusted_list_uris {
                config.additional_trusted_list_uris = value;
            }
            if let Some(value) = override_cfg.disable_default_trusted_list_uri {
                config.disable_default_trusted_list_uri = value;
            }
        }
        Ok(config)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            stale_after: Duration::from_secs(self.key_set_stale_secs),
            failure_grace: Duration::from_secs(self.failure_grace_secs),
            max_bytes: self.max_cache_bytes,
        }
    }

    pub fn validate_options(&self) -> ValidateOptions {
        ValidateOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            trusted_list_cache_time: Duration::from_secs(self.trusted_list_cache_secs),
            additional_trusted_list_uris: self.additional_trusted_list_uris.clone(),
            disable_default_trusted_list_uri: self.disable_default_trusted_list_uri,
        }
    }
}

fn positive_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
