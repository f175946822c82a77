use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::hashrate::HashrateConfig;
use crate::vardiff::VarDiffConfig;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TemplateSettings {
    pub cache_size: usize,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self { cache_size: 64 }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RegistrySettings {
    /// Workers idle longer than this are evicted by the hashrate pass.
    pub retention_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { retention_secs: 86_400 }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MetricsSettings {
    pub push_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { push_interval_secs: 15 }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub network: String,
    /// Treasury address; the pool fee is credited here.
    pub pool_address: String,
    pub api_listen: String,
    pub database_url: Option<String>,
    pub pushgateway: Option<String>,
    pub debug: bool,
    pub templates: TemplateSettings,
    pub vardiff: VarDiffConfig,
    pub hashrate: HashrateConfig,
    pub registry: RegistrySettings,
    pub metrics: MetricsSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            pool_address: String::new(),
            api_listen: "0.0.0.0:8080".to_string(),
            database_url: None,
            pushgateway: None,
            debug: false,
            templates: TemplateSettings::default(),
            vardiff: VarDiffConfig::default(),
            hashrate: HashrateConfig::default(),
            registry: RegistrySettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Config {
    /// File (`KASPOOL_CONFIG`, else `config.json` if present), then env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("KASPOOL_CONFIG").ok();
        let mut cfg = match path.as_deref() {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&txt).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_json(txt: &str) -> Result<Self> {
        Ok(serde_json::from_str(txt)?)
    }

    /// Environment overrides; `lookup` stands in for `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(n) = lookup("KASPOOL_NETWORK") { self.network = n; }
        if let Some(a) = lookup("KASPOOL_POOL_ADDRESS") { self.pool_address = a; }
        if let Some(a) = lookup("KASPOOL_API_LISTEN") { self.api_listen = a; }
        if let Some(u) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) { self.database_url = Some(u); }
        if let Some(g) = lookup("PUSHGATEWAY").filter(|g| !g.is_empty()) { self.pushgateway = Some(g); }
        if let Some(d) = lookup("KASPOOL_DEBUG") {
            self.debug = matches!(d.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(s) = lookup("KASPOOL_SHARES_PER_MIN") {
            self.vardiff.shares_per_minute = s
                .parse()
                .with_context(|| format!("KASPOOL_SHARES_PER_MIN is not a number: {}", s))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_address.trim().is_empty() {
            bail!("pool_address must be set (config file or KASPOOL_POOL_ADDRESS)");
        }
        if !(self.vardiff.shares_per_minute.is_finite() && self.vardiff.shares_per_minute > 0.0) {
            bail!("vardiff.shares_per_minute must be positive");
        }
        if self.templates.cache_size == 0 {
            bail!("templates.cache_size must be positive");
        }
        for (name, secs) in [
            ("vardiff.interval_secs", self.vardiff.interval_secs),
            ("hashrate.interval_secs", self.hashrate.interval_secs),
            ("registry.retention_secs", self.registry.retention_secs),
            ("metrics.push_interval_secs", self.metrics.push_interval_secs),
        ] {
            if secs == 0 {
                bail!("{} must be positive", name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_partial_file() {
        let cfg = Config::from_json(r#"{ "pool_address": "kaspa:pool", "vardiff": { "clamp_pow2": true } }"#).unwrap();
        assert_eq!(cfg.network, "mainnet");
        assert_eq!(cfg.templates.cache_size, 64);
        assert!(cfg.vardiff.clamp_pow2);
        assert_eq!(cfg.vardiff.shares_per_minute, 20.0);
        assert_eq!(cfg.vardiff.interval_secs, 300);
        assert_eq!(cfg.hashrate.interval_secs, 60);
        assert_eq!(cfg.registry.retention_secs, 86_400);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg = Config::from_json(r#"{ "pool_address": "kaspa:file", "network": "mainnet" }"#).unwrap();
        cfg.apply_env(env(&[
            ("KASPOOL_POOL_ADDRESS", "kaspa:env"),
            ("KASPOOL_NETWORK", "testnet-10"),
            ("DATABASE_URL", "postgres://pool@db/pool"),
            ("PUSHGATEWAY", ""),
            ("KASPOOL_DEBUG", "true"),
            ("KASPOOL_SHARES_PER_MIN", "30"),
        ]))
        .unwrap();

        assert_eq!(cfg.pool_address, "kaspa:env");
        assert_eq!(cfg.network, "testnet-10");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://pool@db/pool"));
        assert!(cfg.pushgateway.is_none());
        assert!(cfg.debug);
        assert_eq!(cfg.vardiff.shares_per_minute, 30.0);
    }

    #[test]
    fn test_bad_env_number_is_an_error() {
        let mut cfg = Config::default();
        assert!(cfg.apply_env(env(&[("KASPOOL_SHARES_PER_MIN", "lots")])).is_err());
    }

    #[test]
    fn test_validation_rejects_missing_address_and_zero_intervals() {
        assert!(Config::default().validate().is_err());

        let mut cfg = Config {
            pool_address: "kaspa:pool".into(),
            ..Config::default()
        };
        cfg.hashrate.interval_secs = 0;
        assert!(cfg.validate().is_err());

        cfg.hashrate.interval_secs = 60;
        cfg.vardiff.shares_per_minute = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_retired_stratum_section_is_ignored() {
        // a worker's first share sets its difficulty; older files may still carry this
        let cfg = Config::from_json(r#"{ "pool_address": "kaspa:pool", "stratum": { "difficulty": 4096 } }"#).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.templates.cache_size, 64);
    }
}
