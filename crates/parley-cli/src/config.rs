use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use parley_core::RouterConfig;
use parley_core::providers::{anthropic, openai};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Shipped with the binary; used when no config file exists
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: OpenAiProviderConfig,
    pub anthropic: AnthropicProviderConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: openai::DEFAULT_BASE_URL.to_string(),
            model: openai::DEFAULT_MODEL.to_string(),
        }
    }
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: anthropic::DEFAULT_BASE_URL.to_string(),
            model: anthropic::DEFAULT_MODEL.to_string(),
        }
    }
}

impl std::fmt::Debug for AnthropicProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ParleyConfig {
    /// Load from `custom_path`, else `~/.parley/config.toml`, else the embedded
    /// defaults. Environment overrides are applied last.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok();
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let content = if path.exists() {
            check_permissions(&path)?;
            std::fs::read_to_string(&path).with_context(|| {
                format!("Failed to read config at {}", path.display())
            })?
        } else if custom_path.is_some() {
            return Err(anyhow!("Config file not found at {}", path.display()));
        } else {
            debug!("No config at {}, using built-in defaults", path.display());
            DEFAULT_CONFIG.to_string()
        };

        if content
            .lines()
            .any(|l| l.trim_start().starts_with("api_key") && l.contains("\"sk-"))
        {
            warn!(
                "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\""
            );
        }

        let mut config = Self::parse(&content, &env)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.apply_env_overrides(&env)?;
        Ok(config)
    }

    fn parse(content: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = expand_env_vars(content, env);
        Ok(toml::from_str(&expanded)?)
    }

    fn apply_env_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = env("PORT").filter(|p| !p.is_empty()) {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value '{}'", port))?;
        }
        if let Some(host) = env("BIND_HOST").filter(|h| !h.is_empty()) {
            self.server.host = host;
        }
        if let Some(level) = env("LOG_LEVEL").filter(|l| !l.is_empty()) {
            self.logging.level = level.to_lowercase();
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    /// Copy with API keys masked, for display
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        masked.providers.openai.api_key = mask_secret(&self.providers.openai.api_key);
        masked.providers.anthropic.api_key = mask_secret(&self.providers.anthropic.api_key);
        masked
    }
}

/// Refuse config files readable by group or other; they hold secrets.
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(anyhow!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

/// Keep the first 3 and last 4 characters of long secrets
fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    match count {
        0 => "(empty)".to_string(),
        1..=7 => "***".to_string(),
        _ => {
            let head: String = secret.chars().take(3).collect();
            let tail: String = secret.chars().skip(count - 4).collect();
            format!("{head}...{tail}")
        }
    }
}

const ALLOWED_ENV_VARS: &[&str] = &["OPENAI_API_KEY", "ANTHROPIC_API_KEY"];

/// Expand `${VAR}` references whose names are on the allowlist
fn expand_env_vars(s: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = env(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config_parses() {
        let cfg = ParleyConfig::parse(DEFAULT_CONFIG, &no_env).unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.providers.openai.model, "gpt-4o");
        assert_eq!(cfg.providers.anthropic.model, "claude-sonnet-4-20250514");
        assert!(cfg.providers.openai.api_key.is_empty());
        assert_eq!(cfg.router, RouterConfig::default());
    }

    #[test]
    fn test_partial_router_table_keeps_defaults() {
        let cfg = ParleyConfig::parse("[router]\nmax_call_depth = 10\n", &no_env).unwrap();
        assert_eq!(cfg.router.max_call_depth, 10);
        assert_eq!(cfg.router.max_rounds_emergency, 200);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn test_expand_allowlisted_var() {
        let env = |name: &str| (name == "OPENAI_API_KEY").then(|| "sk-live-123".to_string());
        let out = expand_env_vars("api_key = \"${OPENAI_API_KEY}\"", &env);
        assert_eq!(out, "api_key = \"sk-live-123\"");
    }

    #[test]
    fn test_expand_skips_unlisted_var() {
        let env = |_: &str| Some("leaked".to_string());
        let out = expand_env_vars("path = \"${HOME}/x\" key = \"${ANTHROPIC_API_KEY}\"", &env);
        assert_eq!(out, "path = \"${HOME}/x\" key = \"leaked\"");
    }

    #[test]
    fn test_expand_missing_var_is_empty() {
        assert_eq!(expand_env_vars("k = \"${OPENAI_API_KEY}\"", &no_env), "k = \"\"");
    }

    #[test]
    fn test_env_overrides() {
        let env = |name: &str| match name {
            "PORT" => Some("9100".to_string()),
            "BIND_HOST" => Some("0.0.0.0".to_string()),
            "LOG_LEVEL" => Some("DEBUG".to_string()),
            _ => None,
        };
        let mut cfg = ParleyConfig::default();
        cfg.apply_env_overrides(&env).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.bind_addr().unwrap().to_string(), "0.0.0.0:9100");
    }

    #[test]
    fn test_invalid_port_override() {
        let env = |name: &str| (name == "PORT").then(|| "eighty".to_string());
        let mut cfg = ParleyConfig::default();
        let err = cfg.apply_env_overrides(&env).unwrap_err();
        assert!(err.to_string().contains("Invalid PORT value 'eighty'"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[providers.anthropic]\nmodel = \"claude-test\"\n\n[router]\ndefault_max_rounds = 3"
        )
        .unwrap();
        let cfg = ParleyConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.providers.anthropic.model, "claude-test");
        assert_eq!(cfg.providers.anthropic.base_url, "https://api.anthropic.com");
        assert_eq!(cfg.router.default_max_rounds, 3);
    }

    #[test]
    fn test_load_missing_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = ParleyConfig::load(&Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_rejects_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, DEFAULT_CONFIG).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = ParleyConfig::load(&Some(path)).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefghijkl"), "sk-...ijkl");
        assert_eq!(mask_secret("clé-secrète-9876"), "clé...9876");
    }

    #[test]
    fn test_masked_and_debug_hide_keys() {
        let mut cfg = ParleyConfig::default();
        cfg.providers.openai.api_key = "sk-proj-supersecret".to_string();
        cfg.providers.anthropic.api_key = "sk-ant-supersecret".to_string();

        let shown = toml::to_string_pretty(&cfg.masked()).unwrap();
        assert!(!shown.contains("supersecret"));
        assert!(!format!("{:?}", cfg).contains("supersecret"));
    }
}
