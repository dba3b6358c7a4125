//! Allow/deny rules and the store they are looked up in.
//!
//! Rules come from settings scopes (policy, user, project, local) at
//! startup; the only runtime additions are session-scoped rules.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Project,
    Local,
    User,
    Policy,
    Session,
}

impl RuleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Local => "local",
            Self::User => "user",
            Self::Policy => "policy",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBehavior {
    Allow,
    Deny,
}

impl fmt::Display for RuleBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

impl FromStr for RuleBehavior {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(OrchestratorError::RuleSource(format!(
                "unknown rule behavior: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub tool_name: String,
    pub behavior: RuleBehavior,
    /// Exact match against the tool's normalized input signature; `None` is tool-wide.
    pub content_pattern: Option<String>,
    pub source: RuleSource,
}

impl Rule {
    pub fn new(
        tool_name: impl Into<String>,
        behavior: RuleBehavior,
        content_pattern: Option<String>,
        source: RuleSource,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            behavior,
            content_pattern,
            source,
        }
    }

    /// Parse `name` or `name(content)`.
    ///
    /// The content runs from the first `(` to the final `)`. Empty content
    /// and `*` both mean tool-wide.
    pub fn parse(rule: &str, behavior: RuleBehavior, source: RuleSource) -> Result<Self> {
        let rule = rule.trim();
        let (name, content) = match rule.find('(') {
            None => (rule, None),
            Some(open) => {
                let Some(inner) = rule[open + 1..].strip_suffix(')') else {
                    return Err(OrchestratorError::RuleSource(format!(
                        "rule {rule:?} is missing a closing parenthesis"
                    )));
                };
                (&rule[..open], Some(inner))
            }
        };
        tg_llm::validate_tool_name(name)
            .map_err(|e| OrchestratorError::RuleSource(format!("rule {rule:?}: {e}")))?;
        let content_pattern = content
            .filter(|c| !c.is_empty() && *c != "*")
            .map(str::to_string);
        Ok(Self::new(name, behavior, content_pattern, source))
    }

    pub fn to_rule_string(&self) -> String {
        match &self.content_pattern {
            Some(content) => format!("{}({content})", self.tool_name),
            None => self.tool_name.clone(),
        }
    }
}

/// Produces the persistent rules for one or more settings scopes.
pub trait RuleLoader: Send + Sync {
    fn load_rules(&self) -> Result<Vec<Rule>>;
}

/// Rules keyed by content pattern; `None` is the tool-wide entry.
pub type RuleMap = HashMap<Option<String>, Rule>;

#[derive(Debug, Default)]
pub struct RuleStore {
    persistent: Vec<Rule>,
    session: RwLock<Vec<Rule>>,
}

impl RuleStore {
    pub fn new(persistent: Vec<Rule>) -> Self {
        Self {
            persistent,
            session: RwLock::new(Vec::new()),
        }
    }

    pub fn load(loader: &dyn RuleLoader) -> Result<Self> {
        let rules = loader.load_rules()?;
        tracing::info!(rules = rules.len(), "permission rules loaded");
        Ok(Self::new(rules))
    }

    /// Rules for `tool_name` with `behavior`, later rules overwriting earlier
    /// ones that share a content pattern.
    pub fn get_rules(&self, tool_name: &str, behavior: RuleBehavior) -> RuleMap {
        self.get_rules_normalized(tool_name, behavior, |p| Some(p.to_string()))
    }

    /// Like [`Self::get_rules`], keyed by `normalize(content_pattern)`.
    /// Patterns that normalize to `None` are dropped with a warning.
    pub fn get_rules_normalized(
        &self,
        tool_name: &str,
        behavior: RuleBehavior,
        normalize: impl Fn(&str) -> Option<String>,
    ) -> RuleMap {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = RuleMap::new();
        for rule in self
            .persistent
            .iter()
            .chain(session.iter())
            .filter(|r| r.tool_name == tool_name && r.behavior == behavior)
        {
            let key = match &rule.content_pattern {
                None => None,
                Some(pattern) => match normalize(pattern) {
                    Some(key) => Some(key),
                    None => {
                        tracing::warn!(
                            rule = %rule.to_rule_string(),
                            source = %rule.source,
                            "rule pattern can never match; ignoring"
                        );
                        continue;
                    }
                },
            };
            map.insert(key, rule.clone());
        }
        map
    }

    /// String-keyed lookup; an unknown behavior yields no rules.
    pub fn get_rules_for(&self, tool_name: &str, behavior: &str) -> RuleMap {
        match behavior.parse() {
            Ok(behavior) => self.get_rules(tool_name, behavior),
            Err(_) => RuleMap::new(),
        }
    }

    pub fn add_session_rule(
        &self,
        tool_name: impl Into<String>,
        behavior: RuleBehavior,
        content_pattern: Option<String>,
    ) {
        let rule = Rule::new(tool_name, behavior, content_pattern, RuleSource::Session);
        tracing::debug!(rule = %rule.to_rule_string(), %behavior, "session rule added");
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    /// All rules, persistent first, in load order.
    pub fn rules(&self) -> Vec<Rule> {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        self.persistent.iter().chain(session.iter()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.persistent.len() + self.session.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pick the rule covering any of `keys`, tried in order; a content-pattern
/// match beats the tool-wide rule.
pub fn matching_rule<'a, K: AsRef<str>>(rules: &'a RuleMap, keys: &[K]) -> Option<&'a Rule> {
    keys.iter()
        .find_map(|k| rules.get(&Some(k.as_ref().to_string())))
        .or_else(|| rules.get(&None))
}
