//! Environment-driven runtime configuration, mirroring the variables the
//! disk cache tiers read directly so a consumer only has to set env vars once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const CACHE_DIR_ENV: &str = "AGENT_SESSIONS_CACHE_DIR";
const STRICT_CACHE_ENV: &str = "AGENT_SESSIONS_STRICT_CACHE";
const NO_CACHE_ENV: &str = "AGENT_SESSIONS_NO_CACHE";
const REFRESH_INTERVAL_ENV: &str = "AGENT_SESSIONS_REFRESH_INTERVAL";
const DEFAULT_REFRESH_SECONDS: f64 = 5.0;

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Resolved service configuration. `strict_cache` disables the
/// serve-stale-while-revalidate path: a stale snapshot blocks callers until a
/// fresh one is built rather than being served immediately with a background
/// refresh kicked off behind it.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache_dir_override: Option<PathBuf>,
    pub provider_home_overrides: HashMap<String, PathBuf>,
    pub strict_cache: bool,
    pub disk_cache_disabled: bool,
    pub refresh_interval: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            cache_dir_override: std::env::var(CACHE_DIR_ENV).ok().map(PathBuf::from),
            provider_home_overrides: HashMap::new(),
            strict_cache: env_truthy(STRICT_CACHE_ENV),
            disk_cache_disabled: env_truthy(NO_CACHE_ENV),
            refresh_interval: refresh_interval_from_env(),
        }
    }

    /// `AGENT_SESSIONS_<PROVIDER>_HOME`, provider name upper-cased with `-`
    /// mapped to `_` (e.g. `claude-code` -> `AGENT_SESSIONS_CLAUDE_CODE_HOME`).
    /// An explicit override registered on the config wins over the env var.
    pub fn provider_home_override(&self, provider: &str) -> Option<PathBuf> {
        if let Some(path) = self.provider_home_overrides.get(provider) {
            return Some(path.clone());
        }
        let env_name = format!("AGENT_SESSIONS_{}_HOME", provider.to_uppercase().replace('-', "_"));
        std::env::var(env_name).ok().map(PathBuf::from)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_dir_override: None,
            provider_home_overrides: HashMap::new(),
            strict_cache: false,
            disk_cache_disabled: false,
            refresh_interval: Duration::from_secs_f64(DEFAULT_REFRESH_SECONDS),
        }
    }
}

fn refresh_interval_from_env() -> Duration {
    std::env::var(REFRESH_INTERVAL_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs_f64(DEFAULT_REFRESH_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_five_second_refresh_interval() {
        unsafe {
            std::env::remove_var(REFRESH_INTERVAL_ENV);
        }
        assert_eq!(ServiceConfig::from_env().refresh_interval, Duration::from_secs_f64(5.0));
    }

    #[test]
    fn refresh_interval_parses_fractional_seconds() {
        unsafe {
            std::env::set_var(REFRESH_INTERVAL_ENV, "0.25");
        }
        assert_eq!(ServiceConfig::from_env().refresh_interval, Duration::from_secs_f64(0.25));
        unsafe {
            std::env::remove_var(REFRESH_INTERVAL_ENV);
        }
    }

    #[test]
    fn provider_home_override_derives_env_name() {
        unsafe {
            std::env::set_var("AGENT_SESSIONS_CLAUDE_CODE_HOME", "/tmp/claude-home");
        }
        let config = ServiceConfig::default();
        assert_eq!(
            config.provider_home_override("claude-code"),
            Some(PathBuf::from("/tmp/claude-home"))
        );
        unsafe {
            std::env::remove_var("AGENT_SESSIONS_CLAUDE_CODE_HOME");
        }
    }
}
