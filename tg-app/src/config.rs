//! toolgate configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tg_llm::RetryConfig;
use tg_orchestrator::PermissionMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolgateConfig {
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub mode: PermissionMode,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Bound on concurrent read-only tools; absent means unbounded.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub bash: bool,
    #[serde(default = "default_true")]
    pub filesystem: bool,
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_bash_timeout_secs")]
    pub bash_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_bash_timeout_secs() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash: true,
            filesystem: true,
            root_dir: default_root_dir(),
            bash_timeout_secs: default_bash_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Per-request HTTP timeout for `toolgate send`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ToolgateConfig {
    /// Load `path`, or the default path when it exists, or built-in defaults.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (default_config_path(), false),
        };
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = var("TOOLGATE_PERMISSION_MODE") {
            self.permissions.mode = v
                .parse()
                .map_err(|e| anyhow::anyhow!("TOOLGATE_PERMISSION_MODE: {e}"))?;
        }
        if let Some(v) = var("TOOLGATE_MAX_TOOL_CONCURRENCY") {
            let n = v.trim().parse::<usize>().map_err(|e| {
                anyhow::anyhow!("TOOLGATE_MAX_TOOL_CONCURRENCY={v:?}: {e}")
            })?;
            self.scheduler.max_concurrency = Some(n);
        }
        if let Some(v) = var("TOOLGATE_RESTRICTED") {
            self.retry.restricted = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_concurrency == Some(0) {
            return Err(anyhow::anyhow!("scheduler.max_concurrency must be > 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow::anyhow!(
                "retry.base_delay_ms must be <= retry.max_delay_ms"
            ));
        }
        if self.tools.root_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("tools.root_dir is required"));
        }
        if self.tools.bash && self.tools.bash_timeout_secs == 0 {
            return Err(anyhow::anyhow!("tools.bash_timeout_secs must be > 0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("model.request_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

pub fn toolgate_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".toolgate")
}

pub fn default_config_path() -> PathBuf {
    toolgate_home().join("config.toml")
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
    fn empty_file_uses_defaults() {
        let cfg = ToolgateConfig::from_toml("").unwrap();
        assert_eq!(cfg.permissions.mode, PermissionMode::Default);
        assert_eq!(cfg.scheduler.max_concurrency, None);
        assert_eq!(cfg.retry.max_retries, 10);
        assert!(cfg.tools.bash && cfg.tools.filesystem);
        assert_eq!(cfg.tools.bash_timeout_secs, 120);
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_all_sections() {
        let cfg = ToolgateConfig::from_toml(
            r#"
            [permissions]
            mode = "acceptEdits"

            [scheduler]
            max_concurrency = 4

            [retry]
            max_retries = 3
            restricted = true

            [tools]
            bash = false
            root_dir = "/srv/work"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.permissions.mode, PermissionMode::AcceptEdits);
        assert_eq!(cfg.scheduler.max_concurrency, Some(4));
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert!(cfg.retry.restricted);
        assert!(!cfg.tools.bash);
        assert_eq!(cfg.tools.root_dir, PathBuf::from("/srv/work"));
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = ToolgateConfig::default();
        cfg.apply_env_overrides(env(&[
            ("TOOLGATE_PERMISSION_MODE", "plan"),
            ("TOOLGATE_MAX_TOOL_CONCURRENCY", "2"),
            ("TOOLGATE_RESTRICTED", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.permissions.mode, PermissionMode::Plan);
        assert_eq!(cfg.scheduler.max_concurrency, Some(2));
        assert!(cfg.retry.restricted);

        let mut cfg = ToolgateConfig::default();
        assert!(cfg
            .apply_env_overrides(env(&[("TOOLGATE_PERMISSION_MODE", "yolo")]))
            .is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cfg = ToolgateConfig::from_toml("[scheduler]\nmax_concurrency = 0").unwrap();
        assert!(cfg.validate().is_err());
        let cfg =
            ToolgateConfig::from_toml("[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 100").unwrap();
        assert!(cfg.validate().is_err());
        assert!(ToolgateConfig::from_toml("[permissions]\nmode = \"nope\"").is_err());
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolgateConfig::load(Some(dir.path().join("absent.toml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read config"));
    }
}
