//! Allow / deny / ask decisions for pending tool calls.

use crate::rules::{RuleBehavior, RuleMap, RuleStore, matching_rule};
use crate::session::SessionDecisionCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tg_tools::{Tool, ToolRegistry};

/// A model-issued request to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

impl From<&tg_llm::ToolCall> for ToolCallRequest {
    /// Arguments that are not valid JSON become a string value and fail schema validation.
    fn from(call: &tg_llm::ToolCall) -> Self {
        let input = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
        Self::new(call.id.clone(), call.name.clone(), input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(format!(
                "unknown permission mode {other:?} \
                 (expected default, acceptEdits, plan or bypassPermissions)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBehavior {
    Allow,
    Deny,
    Ask,
}

impl fmt::Display for DecisionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
            Self::Ask => f.write_str("ask"),
        }
    }
}

/// Outcome of [`PermissionEvaluator::evaluate`].
///
/// Only `allow` carries an updated input; the constructors keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    behavior: DecisionBehavior,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_input: Option<serde_json::Value>,
}

impl PermissionDecision {
    pub fn allow(reason: impl Into<String>, updated_input: serde_json::Value) -> Self {
        Self {
            behavior: DecisionBehavior::Allow,
            reason: reason.into(),
            updated_input: Some(updated_input),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            behavior: DecisionBehavior::Deny,
            reason: reason.into(),
            updated_input: None,
        }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            behavior: DecisionBehavior::Ask,
            reason: reason.into(),
            updated_input: None,
        }
    }

    pub fn behavior(&self) -> DecisionBehavior {
        self.behavior
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn updated_input(&self) -> Option<&serde_json::Value> {
        self.updated_input.as_ref()
    }

    pub fn is_allow(&self) -> bool {
        self.behavior == DecisionBehavior::Allow
    }
}

/// A request resolved against its tool: validated, canonicalized, keyed.
pub struct PreparedCall {
    pub tool: Arc<dyn Tool>,
    pub input: serde_json::Value,
    /// Key remembered by an allow-always-this-session answer.
    pub permission_key: Option<String>,
    /// Keys rule content patterns are matched against, most specific first.
    pub rule_keys: Vec<String>,
}

/// Pure decision function over the tool registry and the two permission stores.
pub struct PermissionEvaluator<'a> {
    registry: &'a ToolRegistry,
    rules: &'a RuleStore,
    session: &'a SessionDecisionCache,
}

impl<'a> PermissionEvaluator<'a> {
    pub fn new(
        registry: &'a ToolRegistry,
        rules: &'a RuleStore,
        session: &'a SessionDecisionCache,
    ) -> Self {
        Self {
            registry,
            rules,
            session,
        }
    }

    /// Validate and canonicalize the request; the error is a deny reason.
    pub fn prepare(&self, request: &ToolCallRequest) -> Result<PreparedCall, String> {
        let tool = self
            .registry
            .get(&request.tool_name)
            .ok_or_else(|| format!("unknown tool: {}", request.tool_name))?;
        self.registry
            .validate(&request.tool_name, &request.input)
            .map_err(|e| format!("invalid input: {e}"))?;
        let input = tool
            .canonicalize(request.input.clone())
            .map_err(|e| format!("invalid input: {e}"))?;
        let permission_key = tool.permission_key(&input);
        let rule_keys = tool.rule_keys(&input);
        Ok(PreparedCall {
            tool,
            input,
            permission_key,
            rule_keys,
        })
    }

    fn rules_for(&self, tool: &dyn Tool, name: &str, behavior: RuleBehavior) -> RuleMap {
        self.rules
            .get_rules_normalized(name, behavior, |pattern| tool.normalize_pattern(pattern))
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(tool_call_id = %request.id, tool_name = %request.tool_name, mode = %mode)
    )]
    pub fn evaluate(&self, request: &ToolCallRequest, mode: PermissionMode) -> PermissionDecision {
        let decision = self.decide(request, mode);
        tracing::debug!(
            behavior = %decision.behavior(),
            reason = %decision.reason(),
            "permission evaluated"
        );
        decision
    }

    fn decide(&self, request: &ToolCallRequest, mode: PermissionMode) -> PermissionDecision {
        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(reason) => return PermissionDecision::deny(reason),
        };
        let name = request.tool_name.as_str();
        let tool = prepared.tool.as_ref();
        let keys = prepared.rule_keys.as_slice();

        let deny_rules = self.rules_for(tool, name, RuleBehavior::Deny);
        if let Some(rule) = matching_rule(&deny_rules, keys) {
            return PermissionDecision::deny(format!(
                "denied by {} rule `{}`",
                rule.source,
                rule.to_rule_string()
            ));
        }

        if mode == PermissionMode::BypassPermissions {
            return PermissionDecision::allow(
                format!("allowed by {mode} mode"),
                prepared.input,
            );
        }

        let allow_rules = self.rules_for(tool, name, RuleBehavior::Allow);
        if let Some(rule) = matching_rule(&allow_rules, keys) {
            return PermissionDecision::allow(
                format!(
                    "allowed by {} rule `{}`",
                    rule.source,
                    rule.to_rule_string()
                ),
                prepared.input,
            );
        }

        if self
            .session
            .is_remembered(name, prepared.permission_key.as_deref())
        {
            return PermissionDecision::allow("allowed for this session", prepared.input);
        }

        let spec = prepared.tool.spec();
        if mode == PermissionMode::AcceptEdits && spec.is_file_edit {
            return PermissionDecision::allow(
                format!("file edits are allowed in {mode} mode"),
                prepared.input,
            );
        }
        if mode == PermissionMode::Plan && spec.is_mutating {
            return PermissionDecision::deny(format!(
                "{mode} mode: mutating tool {name} is not run"
            ));
        }

        let reason = prepared
            .tool
            .permission_hint(&prepared.input)
            .unwrap_or_else(|| format!("{name} requires confirmation in {mode} mode"));
        PermissionDecision::ask(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleSource};
    use serde_json::json;
    use std::time::Duration;
    use tg_tools::{BashTool, FsRoot, ReadFileTool, WriteFileTool};

    fn registry(root: &std::path::Path) -> ToolRegistry {
        let fs_root = FsRoot::new(root).unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(BashTool::new(Duration::from_secs(5), root)))
            .unwrap();
        registry
            .register(Arc::new(ReadFileTool::new(fs_root.clone())))
            .unwrap();
        registry
            .register(Arc::new(WriteFileTool::new(fs_root)))
            .unwrap();
        registry
    }

    fn bash(command: &str) -> ToolCallRequest {
        ToolCallRequest::new("tc1", "bash", json!({ "command": command }))
    }

    #[test]
    fn deny_rule_beats_session_and_allow_rules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::new(vec![
            Rule::new("bash", RuleBehavior::Allow, None, RuleSource::Policy),
            Rule::new(
                "bash",
                RuleBehavior::Deny,
                Some("rm -rf /".into()),
                RuleSource::Project,
            ),
        ]);
        let session = SessionDecisionCache::new();
        session.remember("bash", Some("rm -rf /"));
        session.remember("bash", None);
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        for mode in [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::Plan,
            PermissionMode::BypassPermissions,
        ] {
            let decision = evaluator.evaluate(&bash("rm   -rf /"), mode);
            assert_eq!(decision.behavior(), DecisionBehavior::Deny, "{mode}");
            assert!(decision.reason().contains("project"));
            assert!(decision.updated_input().is_none());
        }
        assert!(evaluator.evaluate(&bash("ls"), PermissionMode::Default).is_allow());
    }

    #[test]
    fn no_rules_in_default_mode_asks() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::default();
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let requests = [
            bash("ls"),
            ToolCallRequest::new("tc2", "read_file", json!({"path": "a.txt"})),
            ToolCallRequest::new("tc3", "write_file", json!({"path": "a.txt", "content": ""})),
        ];
        for request in &requests {
            let decision = evaluator.evaluate(request, PermissionMode::Default);
            assert_eq!(decision.behavior(), DecisionBehavior::Ask);
            assert!(decision.updated_input().is_none());
        }
        let decision = evaluator.evaluate(&bash("ls"), PermissionMode::Default);
        assert_eq!(decision.reason(), "bash wants to run `ls`");
    }

    #[test]
    fn invalid_input_is_denied_not_asked() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::default();
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let bad = ToolCallRequest::new("tc1", "bash", json!({ "command": 42 }));
        let decision = evaluator.evaluate(&bad, PermissionMode::BypassPermissions);
        assert_eq!(decision.behavior(), DecisionBehavior::Deny);
        assert!(decision.reason().starts_with("invalid input"));

        let traversal = ToolCallRequest::new("tc2", "read_file", json!({"path": "../x"}));
        let decision = evaluator.evaluate(&traversal, PermissionMode::Default);
        assert_eq!(decision.behavior(), DecisionBehavior::Deny);

        let unknown = ToolCallRequest::new("tc3", "teleport", json!({}));
        let decision = evaluator.evaluate(&unknown, PermissionMode::Default);
        assert_eq!(decision.reason(), "unknown tool: teleport");
    }

    #[test]
    fn allow_carries_canonical_input() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::new(vec![Rule::new(
            "read_file",
            RuleBehavior::Allow,
            Some("src".into()),
            RuleSource::User,
        )]);
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let request = ToolCallRequest::new("tc1", "read_file", json!({"path": "./src/lib.rs"}));
        let decision = evaluator.evaluate(&request, PermissionMode::Default);
        assert!(decision.is_allow());
        assert_eq!(decision.reason(), "allowed by user rule `read_file(src)`");
        assert_eq!(decision.updated_input(), Some(&json!({"path": "src/lib.rs"})));
    }

    #[test]
    fn modes_shape_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::default();
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);
        let write = ToolCallRequest::new("tc1", "write_file", json!({"path": "a", "content": "x"}));
        let read = ToolCallRequest::new("tc2", "read_file", json!({"path": "a"}));

        assert!(evaluator.evaluate(&write, PermissionMode::AcceptEdits).is_allow());
        assert_eq!(
            evaluator.evaluate(&bash("ls"), PermissionMode::AcceptEdits).behavior(),
            DecisionBehavior::Ask
        );
        assert_eq!(
            evaluator.evaluate(&write, PermissionMode::Plan).behavior(),
            DecisionBehavior::Deny
        );
        assert_eq!(
            evaluator.evaluate(&read, PermissionMode::Plan).behavior(),
            DecisionBehavior::Ask
        );
        assert!(evaluator.evaluate(&bash("ls"), PermissionMode::BypassPermissions).is_allow());
    }

    #[test]
    fn file_deny_survives_directory_session_allow_and_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::new(vec![
            Rule::parse("read_file(secrets/key.pem)", RuleBehavior::Deny, RuleSource::Policy)
                .unwrap(),
        ]);
        let session = SessionDecisionCache::new();
        session.remember("read_file", Some("secrets"));
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let key = ToolCallRequest::new("tc1", "read_file", json!({"path": "./secrets/key.pem"}));
        for mode in [PermissionMode::Default, PermissionMode::BypassPermissions] {
            let decision = evaluator.evaluate(&key, mode);
            assert_eq!(decision.behavior(), DecisionBehavior::Deny, "{mode}");
            assert_eq!(
                decision.reason(),
                "denied by policy rule `read_file(secrets/key.pem)`"
            );
        }

        let sibling =
            ToolCallRequest::new("tc2", "read_file", json!({"path": "secrets/notes.txt"}));
        let decision = evaluator.evaluate(&sibling, PermissionMode::Default);
        assert_eq!(decision.reason(), "allowed for this session");
    }

    #[test]
    fn directory_deny_covers_files_inside_it() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::new(vec![
            Rule::parse("read_file(secrets)", RuleBehavior::Deny, RuleSource::Project).unwrap(),
            Rule::new("read_file", RuleBehavior::Allow, None, RuleSource::User),
        ]);
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let inside = ToolCallRequest::new("tc1", "read_file", json!({"path": "secrets/a.txt"}));
        assert_eq!(
            evaluator.evaluate(&inside, PermissionMode::Default).behavior(),
            DecisionBehavior::Deny
        );
        let outside = ToolCallRequest::new("tc2", "read_file", json!({"path": "src/a.txt"}));
        assert!(evaluator.evaluate(&outside, PermissionMode::Default).is_allow());
    }

    #[test]
    fn rule_patterns_are_normalized_like_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::new(vec![
            Rule::parse("bash( rm  -rf / )", RuleBehavior::Deny, RuleSource::Local).unwrap(),
            Rule::parse("read_file(./docs/)", RuleBehavior::Allow, RuleSource::User).unwrap(),
            Rule::parse("read_file(../outside)", RuleBehavior::Allow, RuleSource::User).unwrap(),
        ]);
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let decision = evaluator.evaluate(&bash("rm -rf /"), PermissionMode::BypassPermissions);
        assert_eq!(decision.behavior(), DecisionBehavior::Deny);
        assert_eq!(decision.reason(), "denied by local rule `bash( rm  -rf / )`");

        let docs = ToolCallRequest::new("tc2", "read_file", json!({"path": "docs/guide.md"}));
        assert_eq!(
            evaluator.evaluate(&docs, PermissionMode::Default).reason(),
            "allowed by user rule `read_file(./docs/)`"
        );
    }

    #[test]
    fn model_tool_calls_with_bad_arguments_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::default();
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);

        let garbled = tg_llm::ToolCall {
            id: "tc1".to_string(),
            name: "bash".to_string(),
            arguments: "{not json".to_string(),
        };
        let request = ToolCallRequest::from(&garbled);
        assert_eq!(request.input, json!("{not json"));
        let decision = evaluator.evaluate(&request, PermissionMode::BypassPermissions);
        assert_eq!(decision.behavior(), DecisionBehavior::Deny);
        assert!(decision.reason().starts_with("invalid input"));

        let call = tg_llm::ToolCall {
            id: "tc2".to_string(),
            name: "bash".to_string(),
            arguments: r#"{"command":"ls"}"#.to_string(),
        };
        let request = ToolCallRequest::from(&call);
        assert_eq!(request.input, json!({"command": "ls"}));
        assert!(evaluator.evaluate(&request, PermissionMode::BypassPermissions).is_allow());
    }

    #[test]
    fn evaluation_does_not_mutate_stores() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let rules = RuleStore::default();
        let session = SessionDecisionCache::new();
        let evaluator = PermissionEvaluator::new(&registry, &rules, &session);
        for mode in [PermissionMode::Default, PermissionMode::BypassPermissions] {
            evaluator.evaluate(&bash("ls"), mode);
        }
        assert!(rules.is_empty());
        assert!(session.is_empty());
    }

    #[test]
    fn decision_serializes_camel_case() {
        let v = serde_json::to_value(PermissionDecision::allow("ok", json!({"a": 1}))).unwrap();
        assert_eq!(v["behavior"], "allow");
        assert_eq!(v["updatedInput"]["a"], 1);
        let v = serde_json::to_value(PermissionDecision::ask("?")).unwrap();
        assert!(v.get("updatedInput").is_none());
        assert_eq!(
            "acceptEdits".parse::<PermissionMode>().unwrap(),
            PermissionMode::AcceptEdits
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }
}
