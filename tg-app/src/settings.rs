//! Permission rules from per-scope settings files.

use crate::config::toolgate_home;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tg_orchestrator::{OrchestratorError, Rule, RuleBehavior, RuleLoader, RuleSource};

const POLICY_FILE_ENV: &str = "TOOLGATE_POLICY_FILE";
const DEFAULT_POLICY_FILE: &str = "/etc/toolgate/policy.toml";

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    permissions: PermissionLists,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionLists {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
}

/// Reads `[permissions] allow/deny` rule strings from one file per scope.
#[derive(Debug, Clone, Default)]
pub struct SettingsRuleSource {
    scopes: Vec<(RuleSource, PathBuf)>,
}

impl SettingsRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard scope files for a project rooted at `cwd`.
    pub fn discover(cwd: &Path) -> Self {
        let policy = std::env::var(POLICY_FILE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_POLICY_FILE));
        Self::new()
            .with_scope(RuleSource::User, toolgate_home().join("settings.toml"))
            .with_scope(
                RuleSource::Project,
                cwd.join(".toolgate").join("settings.toml"),
            )
            .with_scope(
                RuleSource::Local,
                cwd.join(".toolgate").join("settings.local.toml"),
            )
            .with_scope(RuleSource::Policy, policy)
    }

    pub fn with_scope(mut self, source: RuleSource, path: impl Into<PathBuf>) -> Self {
        self.scopes.push((source, path.into()));
        self
    }

    pub fn scopes(&self) -> &[(RuleSource, PathBuf)] {
        &self.scopes
    }
}

impl RuleLoader for SettingsRuleSource {
    fn load_rules(&self) -> tg_orchestrator::Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for (source, path) in &self.scopes {
            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(%source, path = %path.display(), "settings file absent");
                    continue;
                }
                Err(e) => {
                    return Err(OrchestratorError::RuleSource(format!(
                        "read {}: {e}",
                        path.display()
                    )));
                }
            };
            let file: SettingsFile = toml::from_str(&contents).map_err(|e| {
                OrchestratorError::RuleSource(format!("parse {}: {e}", path.display()))
            })?;
            let before = rules.len();
            push_rules(&mut rules, &file.permissions.allow, RuleBehavior::Allow, *source, path);
            push_rules(&mut rules, &file.permissions.deny, RuleBehavior::Deny, *source, path);
            tracing::debug!(
                %source,
                path = %path.display(),
                rules = rules.len() - before,
                "settings loaded"
            );
        }
        Ok(rules)
    }
}

fn push_rules(
    out: &mut Vec<Rule>,
    entries: &[String],
    behavior: RuleBehavior,
    source: RuleSource,
    path: &Path,
) {
    for entry in entries {
        match Rule::parse(entry, behavior, source) {
            Ok(rule) => out.push(rule),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    entry = %entry,
                    error = %e,
                    "skipping malformed rule"
                );
            }
        }
    }
}
