//! Process-wide engine settings, read once at startup.

use crate::error::ConfigError;

pub const DEFAULT_PER_PAGE: u64 = 30;
pub const DEFAULT_MAX_PER_PAGE: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Page size when neither the request nor the record's list config sets one.
    pub default_per_page: u64,
    /// Upper bound for any requested page size.
    pub max_per_page: u64,
    /// Master switch for debug output; admins also need the per-request debug flag.
    pub debug_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: DEFAULT_MAX_PER_PAGE,
            debug_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Reads `CRUDMAP_PER_PAGE`, `CRUDMAP_MAX_PER_PAGE` and `CRUDMAP_DEBUG`; unset keeps the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = EngineConfig::default();
        if let Some(v) = get("CRUDMAP_PER_PAGE") {
            cfg.default_per_page = parse_positive("CRUDMAP_PER_PAGE", &v)?;
        }
        if let Some(v) = get("CRUDMAP_MAX_PER_PAGE") {
            cfg.max_per_page = parse_positive("CRUDMAP_MAX_PER_PAGE", &v)?;
        }
        if let Some(v) = get("CRUDMAP_DEBUG") {
            cfg.debug_enabled = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if cfg.default_per_page > cfg.max_per_page {
            return Err(ConfigError::Validation(format!(
                "CRUDMAP_PER_PAGE ({}) exceeds CRUDMAP_MAX_PER_PAGE ({})",
                cfg.default_per_page, cfg.max_per_page
            )));
        }
        Ok(cfg)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Validation(format!("{} must be a positive integer, got `{}`", key, raw))),
    }
}
